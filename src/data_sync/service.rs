use crate::address::Address;
use crate::cache::{AsyncDataCache, FetchOptions, Fingerprint, RefreshTier, Snapshot, Subscription};
use crate::data_sync::{
    aggregator::{FanOutAggregator, Sourced},
    config::DataSyncConfig,
    markets::{MarketDescriptor, MarketRegistry},
    migration::{MigrationResolver, discover_residual},
    types::{
        BalanceSummary, Currency, MarketBalances, OpenOrdersAccount, Order, OrderBook, ResidualScan, WalletBalance,
        to_ui_amount,
    },
};
use crate::error::{SyncError, SyncResult};
use crate::notify::{Notification, Notifier, TracingNotifier};
use crate::ports::{ActorIdentity, Connection, ConnectionProvider, MarketLoader, StaticActor};
use crate::utils::preferences::{MemoryPreferenceStore, PreferenceStore};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

const OPEN_ORDERS_ACCOUNTS: &str = "open_orders_accounts";
const OPEN_ORDERS: &str = "open_orders";
const BALANCES: &str = "balances";
const ORDER_BOOK: &str = "order_book";
const ALL_OPEN_ORDERS: &str = "all_open_orders";
const ALL_WALLET_BALANCES: &str = "all_wallet_balances";
const DEPRECATED_MARKET_ORDERS: &str = "deprecated_market_orders";
const UNMIGRATED_ACCOUNTS: &str = "unmigrated_open_orders_accounts";

type QueryProducer<T> = Arc<dyn Fn() -> BoxFuture<'static, eyre::Result<T>> + Send + Sync>;

/// A call site bound to its current inputs.
struct Query<T> {
    fingerprint: Fingerprint,
    options: FetchOptions,
    producer: QueryProducer<T>,
}

/// Market data for the trading UI, kept fresh through one shared cache.
///
/// Every read returns immediately with the cached value and a loading flag. Calls scoped
/// to the actor short-circuit to an empty result while no wallet is connected.
pub struct MarketDataService {
    config: DataSyncConfig,
    cache: AsyncDataCache,
    registry: MarketRegistry,
    resolver: MigrationResolver,
    aggregator: FanOutAggregator,
    loader: Arc<dyn MarketLoader>,
    connections: Arc<dyn ConnectionProvider>,
    actor: Arc<dyn ActorIdentity>,
    notifier: Arc<dyn Notifier>,
    selected: RwLock<MarketDescriptor>,
    /// Set while the connection provider is failing; the outage is notified once
    connection_down: AtomicBool,
}

impl MarketDataService {
    pub fn config(&self) -> &DataSyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &AsyncDataCache {
        &self.cache
    }

    pub fn registry(&self) -> &MarketRegistry {
        &self.registry
    }

    pub fn selected_market(&self) -> MarketDescriptor {
        self.selected.read().clone()
    }

    /// Select a listed market and persist the choice.
    pub fn select_market(&self, address: &Address) -> SyncResult<MarketDescriptor> {
        let market = self.registry.find(address).ok_or_else(|| SyncError::UnknownMarket(address.clone()))?;
        if market.deprecated {
            warn!("Selecting deprecated market {} ({})", market.name, market.address);
        }
        self.registry.set_selected(&market.address)?;
        *self.selected.write() = market.clone();
        info!("Selected market {} ({})", market.name, market.address);
        Ok(market)
    }

    pub fn markets(&self) -> Vec<MarketDescriptor> {
        self.registry.markets()
    }

    pub fn add_custom_market(&self, market: MarketDescriptor) -> SyncResult<()> {
        self.registry.add_custom(market)
    }

    /// Remove a user market. Removing the selected market falls back to the default.
    pub fn remove_custom_market(&self, address: &Address) -> SyncResult<bool> {
        let removed = self.registry.remove_custom(address)?;
        if removed && &self.selected.read().address == address {
            let outcome = self.resolver.resolve(&self.registry, &self.config.markets.default_market)?;
            *self.selected.write() = outcome.into_market();
        }
        Ok(removed)
    }

    pub fn open_orders_accounts(&self, market: &MarketDescriptor) -> Snapshot<Vec<OpenOrdersAccount>> {
        self.run(self.open_orders_accounts_query(market))
    }

    pub fn open_orders(&self, market: &MarketDescriptor) -> Snapshot<Vec<Order>> {
        self.run(self.open_orders_query(market))
    }

    pub fn balances(&self, market: &MarketDescriptor) -> Snapshot<MarketBalances> {
        self.run(self.balances_query(market))
    }

    /// Public data, available without a connected wallet.
    pub fn order_book(&self, market: &MarketDescriptor) -> Snapshot<OrderBook> {
        self.run(self.order_book_query(market))
    }

    /// Mark price derived from the cached order book.
    pub fn mark_price(&self, market: &MarketDescriptor, last_trade: Option<f64>) -> Snapshot<f64> {
        let book = self.order_book(market);
        Snapshot {
            value: book.value().and_then(|b| b.mark_price(last_trade)).map(Arc::new),
            loading: book.loading,
            fetched_at: book.fetched_at,
        }
    }

    pub fn subscribe_order_book(&self, market: &MarketDescriptor) -> Option<Subscription<OrderBook>> {
        self.watch(self.order_book_query(market))
    }

    pub fn subscribe_open_orders(&self, market: &MarketDescriptor) -> Option<Subscription<Vec<Order>>> {
        self.watch(self.open_orders_query(market))
    }

    pub fn subscribe_balances(&self, market: &MarketDescriptor) -> Option<Subscription<MarketBalances>> {
        self.watch(self.balances_query(market))
    }

    /// The actor's orders on every active market.
    pub fn open_orders_for_all_markets(&self) -> Snapshot<Vec<Sourced<Order>>> {
        let aggregator = self.fan_out(ALL_OPEN_ORDERS, self.config.fan_out.open_orders_enabled);
        if !aggregator.is_enabled() {
            return Snapshot::ready(Vec::new());
        }
        self.run(self.orders_fan_out_query(aggregator, &self.registry.active()))
    }

    /// The actor's wallet balances for the base and quote mints of every active market.
    pub fn wallet_balances_for_all_markets(&self) -> Snapshot<Vec<Sourced<WalletBalance>>> {
        let aggregator = self.fan_out(ALL_WALLET_BALANCES, self.config.fan_out.wallet_balances_enabled);
        if !aggregator.is_enabled() {
            return Snapshot::ready(Vec::new());
        }
        self.run(self.all_wallet_balances_query(aggregator, &self.registry.active()))
    }

    /// Orders still resting on deprecated markets where the actor has residual accounts.
    pub fn deprecated_market_orders(&self) -> Snapshot<Vec<Sourced<Order>>> {
        let aggregator = self.fan_out(DEPRECATED_MARKET_ORDERS, self.config.fan_out.deprecated_orders_enabled);
        if !aggregator.is_enabled() {
            return Snapshot::ready(Vec::new());
        }
        let residual = self.unmigrated_open_orders_accounts();
        let Some(scan) = residual.value() else {
            return Snapshot { value: None, loading: residual.loading, fetched_at: None };
        };
        let markets = self.residual_markets(scan);
        if markets.is_empty() {
            return Snapshot::ready(Vec::new());
        }
        self.run(self.orders_fan_out_query(aggregator, &markets))
    }

    /// Legacy open-orders accounts still holding funds.
    pub fn unmigrated_open_orders_accounts(&self) -> Snapshot<ResidualScan> {
        self.run(self.unmigrated_query())
    }

    /// Invalidate the residual scan after a migration. Returns whether an entry existed.
    pub fn refresh_unmigrated(&self, clear_value: bool) -> bool {
        let Some((actor, connection)) = self.scope() else {
            return false;
        };
        self.cache.invalidate(&self.unmigrated_key(&actor, connection.as_ref()), clear_value)
    }

    /// Mark the actor's per-market data stale after placing or cancelling an order.
    pub fn refresh_open_orders(&self, market: &MarketDescriptor) -> bool {
        let Some((actor, connection)) = self.scope() else {
            return false;
        };
        let mut refreshed = false;
        for operation in [OPEN_ORDERS_ACCOUNTS, OPEN_ORDERS, BALANCES] {
            refreshed |= self.cache.invalidate(&market_key(operation, &actor, connection.as_ref(), market), false);
        }
        refreshed
    }

    fn run<T: Default + Send + Sync + 'static>(&self, query: Option<Query<T>>) -> Snapshot<T> {
        match query {
            Some(query) => {
                let producer = query.producer;
                self.cache.get(&query.fingerprint, move || producer(), query.options)
            }
            None => Snapshot::ready(T::default()),
        }
    }

    fn watch<T: Send + Sync + 'static>(&self, query: Option<Query<T>>) -> Option<Subscription<T>> {
        let query = query?;
        let producer = query.producer;
        Some(self.cache.subscribe(&query.fingerprint, move || producer(), query.options))
    }

    fn query<T, F, Fut>(&self, fingerprint: Fingerprint, tier: RefreshTier, producer: F) -> Query<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<T>> + Send + 'static,
    {
        Query {
            fingerprint,
            options: FetchOptions::for_tier(tier, &self.config.cache),
            producer: Arc::new(move || producer().boxed()),
        }
    }

    /// Aggregator for one fan-out call site, switched by its `[fan_out]` flag.
    fn fan_out(&self, operation: &'static str, enabled: bool) -> FanOutAggregator {
        self.aggregator.clone().named(operation).with_enabled(enabled)
    }

    /// Actor and live connection, or `None` when either is missing.
    fn scope(&self) -> Option<(Address, Arc<dyn Connection>)> {
        let actor = self.actor.current()?;
        let connection = self.connection()?;
        Some((actor, connection))
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        match self.connections.connection() {
            Ok(connection) => {
                if self.connection_down.swap(false, Ordering::AcqRel) {
                    info!("Connection restored ({})", connection.endpoint());
                }
                Some(connection)
            }
            Err(e) => {
                let error = SyncError::ConnectionUnavailable(format!("{e:#}"));
                if self.connection_down.swap(true, Ordering::AcqRel) {
                    debug!("{}", error);
                } else {
                    warn!("{}", error);
                    self.notifier.notify(Notification::error("Connection unavailable", error.to_string()));
                }
                None
            }
        }
    }

    fn open_orders_accounts_query(&self, market: &MarketDescriptor) -> Option<Query<Vec<OpenOrdersAccount>>> {
        let (actor, connection) = self.scope()?;
        let fingerprint = market_key(OPEN_ORDERS_ACCOUNTS, &actor, connection.as_ref(), market);
        let loader = Arc::clone(&self.loader);
        let market = market.clone();

        Some(self.query(fingerprint, RefreshTier::Slow, move || {
            let (loader, connection, market, actor) =
                (Arc::clone(&loader), Arc::clone(&connection), market.clone(), actor.clone());
            async move {
                let handle = loader.load(connection, &market).await?;
                handle.find_open_orders_accounts_for_owner(&actor).await
            }
        }))
    }

    fn open_orders_query(&self, market: &MarketDescriptor) -> Option<Query<Vec<Order>>> {
        let (actor, connection) = self.scope()?;
        let fingerprint = market_key(OPEN_ORDERS, &actor, connection.as_ref(), market);
        let loader = Arc::clone(&self.loader);
        let market = market.clone();

        Some(self.query(fingerprint, RefreshTier::Slow, move || {
            let (loader, connection, market, actor) =
                (Arc::clone(&loader), Arc::clone(&connection), market.clone(), actor.clone());
            async move {
                let handle = loader.load(connection, &market).await?;
                handle.load_orders_for_owner(&actor).await
            }
        }))
    }

    fn balances_query(&self, market: &MarketDescriptor) -> Option<Query<MarketBalances>> {
        let (actor, connection) = self.scope()?;
        let fingerprint = market_key(BALANCES, &actor, connection.as_ref(), market);
        let loader = Arc::clone(&self.loader);
        let market = market.clone();

        Some(self.query(fingerprint, RefreshTier::Slow, move || {
            let (loader, connection, market, actor) =
                (Arc::clone(&loader), Arc::clone(&connection), market.clone(), actor.clone());
            async move {
                let handle = loader.load(Arc::clone(&connection), &market).await?;
                let accounts = handle.find_open_orders_accounts_for_owner(&actor).await?;
                let base_wallet = connection.token_balance(&actor, handle.base_mint()).await?;
                let quote_wallet = connection.token_balance(&actor, handle.quote_mint()).await?;

                Ok::<_, eyre::Report>(MarketBalances {
                    market: Some(market.address.clone()),
                    base: balance_summary(handle.base_mint(), base_wallet, handle.base_decimals(), &accounts, |a| {
                        (a.base_token_locked(), a.base_token_free)
                    }),
                    quote: balance_summary(handle.quote_mint(), quote_wallet, handle.quote_decimals(), &accounts, |a| {
                        (a.quote_token_locked(), a.quote_token_free)
                    }),
                })
            }
        }))
    }

    fn order_book_query(&self, market: &MarketDescriptor) -> Option<Query<OrderBook>> {
        let connection = self.connection()?;
        let fingerprint = Fingerprint::new(ORDER_BOOK).with(connection.endpoint()).with(&market.address);
        let loader = Arc::clone(&self.loader);
        let market = market.clone();
        let depth = self.config.order_book_depth;

        Some(self.query(fingerprint, RefreshTier::Fast, move || {
            let (loader, connection, market) = (Arc::clone(&loader), Arc::clone(&connection), market.clone());
            async move {
                let handle = loader.load(connection, &market).await?;
                let mut book = handle.load_order_book(depth).await?.truncated(depth);
                book.market = Some(market.address.clone());
                Ok::<_, eyre::Report>(book)
            }
        }))
    }

    /// Orders of the actor across `markets`; markets without an open-orders account are skipped.
    fn orders_fan_out_query(
        &self,
        aggregator: FanOutAggregator,
        markets: &[MarketDescriptor],
    ) -> Option<Query<Vec<Sourced<Order>>>> {
        let (actor, connection) = self.scope()?;
        let fingerprint = fan_out_key(aggregator.operation(), &actor, connection.as_ref(), markets);
        let markets = markets.to_vec();

        Some(self.query(fingerprint, RefreshTier::Slow, move || {
            let (aggregator, connection, markets, actor) =
                (aggregator.clone(), Arc::clone(&connection), markets.clone(), actor.clone());
            async move {
                let orders = aggregator
                    .aggregate(connection, &markets, |handle, _market| {
                        let actor = actor.clone();
                        async move {
                            let accounts = handle.find_open_orders_accounts_for_owner(&actor).await?;
                            if accounts.is_empty() {
                                return Ok::<_, eyre::Report>(Vec::new());
                            }
                            handle.load_orders_for_owner(&actor).await
                        }
                    })
                    .await;
                Ok::<_, eyre::Report>(orders)
            }
        }))
    }

    fn all_wallet_balances_query(
        &self,
        aggregator: FanOutAggregator,
        markets: &[MarketDescriptor],
    ) -> Option<Query<Vec<Sourced<WalletBalance>>>> {
        let (actor, connection) = self.scope()?;
        let fingerprint = fan_out_key(aggregator.operation(), &actor, connection.as_ref(), markets);
        let markets = markets.to_vec();

        Some(self.query(fingerprint, RefreshTier::Slow, move || {
            let (aggregator, connection, markets, actor) =
                (aggregator.clone(), Arc::clone(&connection), markets.clone(), actor.clone());
            async move {
                let balances = aggregator
                    .aggregate(Arc::clone(&connection), &markets, |handle, _market| {
                        let (connection, actor) = (Arc::clone(&connection), actor.clone());
                        async move {
                            let mut balances = Vec::new();
                            let sides = [
                                (Currency::Base, handle.base_mint().clone(), handle.base_decimals()),
                                (Currency::Quote, handle.quote_mint().clone(), handle.quote_decimals()),
                            ];
                            for (currency, mint, decimals) in sides {
                                if let Some(amount) = connection.token_balance(&actor, &mint).await? {
                                    balances.push(WalletBalance { mint, currency, amount: to_ui_amount(amount, decimals) });
                                }
                            }
                            Ok::<_, eyre::Report>(balances)
                        }
                    })
                    .await;
                Ok::<_, eyre::Report>(balances)
            }
        }))
    }

    fn unmigrated_query(&self) -> Option<Query<ResidualScan>> {
        let (actor, connection) = self.scope()?;
        let fingerprint = self.unmigrated_key(&actor, connection.as_ref());
        let program_ids = self.registry.deprecated_program_ids();

        Some(self.query(fingerprint, RefreshTier::VerySlow, move || {
            let (connection, program_ids, actor) = (Arc::clone(&connection), program_ids.clone(), actor.clone());
            async move {
                let scan = discover_residual(connection.as_ref(), &actor, &program_ids).await;
                debug!("Residual scan found {} accounts, {} programs failed", scan.accounts.len(), scan.failed_programs.len());
                Ok::<_, eyre::Report>(scan)
            }
        }))
    }

    fn unmigrated_key(&self, actor: &Address, connection: &dyn Connection) -> Fingerprint {
        actor_key(UNMIGRATED_ACCOUNTS, actor, connection).with_list(&self.registry.deprecated_program_ids())
    }

    /// Deprecated markets for the residual accounts, in discovery order. Accounts on a
    /// market missing from the registry get a placeholder descriptor.
    fn residual_markets(&self, scan: &ResidualScan) -> Vec<MarketDescriptor> {
        scan.markets()
            .into_iter()
            .filter_map(|address| {
                let account = scan.accounts.iter().find(|a| a.market == address)?;
                Some(self.registry.find(&address).unwrap_or_else(|| {
                    MarketDescriptor::new(address.clone(), "Unknown", account.program_id.clone()).deprecated()
                }))
            })
            .collect()
    }
}

fn actor_key(operation: &str, actor: &Address, connection: &dyn Connection) -> Fingerprint {
    Fingerprint::new(operation).with(actor).with(connection.endpoint())
}

fn market_key(operation: &str, actor: &Address, connection: &dyn Connection, market: &MarketDescriptor) -> Fingerprint {
    actor_key(operation, actor, connection).with(&market.address)
}

fn fan_out_key(operation: &str, actor: &Address, connection: &dyn Connection, markets: &[MarketDescriptor]) -> Fingerprint {
    actor_key(operation, actor, connection).with_list(markets.iter().map(|m| &m.address))
}

fn balance_summary(
    mint: &Address,
    wallet: Option<u64>,
    decimals: u8,
    accounts: &[OpenOrdersAccount],
    split: impl Fn(&OpenOrdersAccount) -> (u64, u64),
) -> BalanceSummary {
    let (orders, unsettled) = if accounts.is_empty() {
        (None, None)
    } else {
        let (locked, free) =
            accounts.iter().map(split).fold((0u64, 0u64), |(l, f), (a, b)| (l.saturating_add(a), f.saturating_add(b)));
        (Some(to_ui_amount(locked, decimals)), Some(to_ui_amount(free, decimals)))
    };
    BalanceSummary { mint: Some(mint.clone()), wallet: wallet.map(|w| to_ui_amount(w, decimals)), orders, unsettled }
}

/// Builder for MarketDataService
pub struct MarketDataServiceBuilder {
    config: DataSyncConfig,
    markets: Vec<MarketDescriptor>,
    loader: Option<Arc<dyn MarketLoader>>,
    connections: Option<Arc<dyn ConnectionProvider>>,
    actor: Option<Arc<dyn ActorIdentity>>,
    notifier: Option<Arc<dyn Notifier>>,
    preferences: Option<Arc<dyn PreferenceStore>>,
}

impl MarketDataServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: DataSyncConfig::default(),
            markets: Vec::new(),
            loader: None,
            connections: None,
            actor: None,
            notifier: None,
            preferences: None,
        }
    }

    pub fn with_config(mut self, config: DataSyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Built-in markets; overrides `markets.list` from the configuration.
    pub fn with_markets(mut self, markets: Vec<MarketDescriptor>) -> Self {
        self.markets = markets;
        self
    }

    pub fn add_market(mut self, market: MarketDescriptor) -> Self {
        self.markets.push(market);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn MarketLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_connection_provider(mut self, connections: Arc<dyn ConnectionProvider>) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn with_actor(mut self, actor: Arc<dyn ActorIdentity>) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_preferences(mut self, preferences: Arc<dyn PreferenceStore>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    /// Resolve the persisted selection once; a deprecated selection is redirected to the
    /// default market and the redirect is persisted.
    pub fn build(self) -> eyre::Result<MarketDataService> {
        self.config.validate()?;
        let loader = self.loader.ok_or_else(|| eyre::eyre!("MarketDataService requires a market loader"))?;
        let connections =
            self.connections.ok_or_else(|| eyre::eyre!("MarketDataService requires a connection provider"))?;
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));
        let actor = self.actor.unwrap_or_else(|| Arc::new(StaticActor::default()));
        let preferences = self.preferences.unwrap_or_else(|| Arc::new(MemoryPreferenceStore::new()));

        let built_in = if self.markets.is_empty() { self.config.markets.list.clone() } else { self.markets };
        info!("Initializing MarketDataService with {} built-in markets", built_in.len());
        let registry = MarketRegistry::new(built_in, preferences);
        let resolver = MigrationResolver::new(Arc::clone(&notifier));

        let selected = resolver.resolve(&registry, &self.config.markets.default_market)?.into_market();

        Ok(MarketDataService {
            cache: AsyncDataCache::new(Arc::clone(&notifier)),
            aggregator: FanOutAggregator::new(Arc::clone(&loader), Arc::clone(&notifier)),
            config: self.config,
            registry,
            resolver,
            loader,
            connections,
            actor,
            notifier,
            selected: RwLock::new(selected),
            connection_down: AtomicBool::new(false),
        })
    }
}

impl Default for MarketDataServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
