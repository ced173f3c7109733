/// Scenario tests for the market data service
///
/// The collaborators are in-memory mocks; fetches still run on the tokio runtime,
/// so reads are repeated until the entry settles.

#[cfg(test)]
mod integration_tests {
    use super::super::*;
    use crate::address::Address;
    use crate::cache::Snapshot;
    use crate::data_sync::mock::{
        MockConnection, MockConnectionProvider, MockLoader, MockMarket, RecordingNotifier, open_orders_account, order,
    };
    use crate::notify::Severity;
    use crate::ports::StaticActor;
    use crate::utils::constants::SELECTED_MARKET_KEY;
    use crate::utils::preferences::{MemoryPreferenceStore, PreferenceStore};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        service: MarketDataService,
        loader: Arc<MockLoader>,
        connection: Arc<MockConnection>,
        notifier: Arc<RecordingNotifier>,
    }

    fn owner() -> Address {
        Address::new("owner")
    }

    fn active_markets() -> Vec<MarketDescriptor> {
        vec![
            MarketDescriptor::new("m1", "SRM/USDT", "v2"),
            MarketDescriptor::new("m2", "BTC/USDT", "v2"),
            MarketDescriptor::new("m3", "ETH/USDT", "v2"),
        ]
    }

    fn fan_out_config() -> DataSyncConfig {
        let mut config = DataSyncConfig::default();
        config.fan_out.open_orders_enabled = true;
        config.fan_out.wallet_balances_enabled = true;
        config
    }

    fn trading_market(address: &str, first_order: u128) -> MockMarket {
        MockMarket::new(address)
            .with_open_orders(open_orders_account(address, &owner(), "v2", 0, 0))
            .with_orders(vec![order(address, first_order, Side::Buy, 1.0), order(address, first_order + 1, Side::Sell, 2.0)])
    }

    fn build(
        markets: Vec<MarketDescriptor>,
        loader: MockLoader,
        connection: MockConnection,
        actor: Option<Address>,
        config: DataSyncConfig,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Fixture {
        let loader = Arc::new(loader);
        let connection = Arc::new(connection);
        let notifier = RecordingNotifier::new();
        let service = MarketDataServiceBuilder::new()
            .with_config(config)
            .with_markets(markets)
            .with_loader(loader.clone())
            .with_connection_provider(Arc::new(MockConnectionProvider::new(connection.clone())))
            .with_actor(Arc::new(StaticActor(actor)))
            .with_notifier(notifier.clone())
            .with_preferences(preferences)
            .build()
            .unwrap();
        Fixture { service, loader, connection, notifier }
    }

    fn fixture(loader: MockLoader, connection: MockConnection, config: DataSyncConfig) -> Fixture {
        build(active_markets(), loader, connection, Some(owner()), config, Arc::new(MemoryPreferenceStore::new()))
    }

    async fn settle<T>(read: impl Fn() -> Snapshot<T>) -> Snapshot<T> {
        for _ in 0..100 {
            let snapshot = read();
            if !snapshot.loading {
                return snapshot;
            }
            tokio::task::yield_now().await;
        }
        panic!("entry still loading");
    }

    #[tokio::test]
    async fn test_fan_out_skips_failing_market() {
        let loader = MockLoader::new()
            .with_market(trading_market("m1", 10))
            .with_market(trading_market("m2", 20))
            .with_market(trading_market("m3", 30))
            .failing_on("m2");
        let f = fixture(loader, MockConnection::new("rpc"), fan_out_config());

        let first = f.service.open_orders_for_all_markets();
        assert!(first.loading);
        assert!(first.value.is_none());

        let snapshot = settle(|| f.service.open_orders_for_all_markets()).await;
        let orders = snapshot.value().unwrap();
        let ids: Vec<u128> = orders.iter().map(|o| o.payload.order_id).collect();
        assert_eq!(ids, vec![10, 11, 30, 31]);
        assert_eq!(orders[2].market.address, Address::new("m3"));

        let notifications = f.notifier.all();
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].message.contains("BTC/USDT"));
    }

    #[tokio::test]
    async fn test_fan_out_is_one_cached_unit() {
        let loader = MockLoader::new().with_market(trading_market("m1", 10)).with_market(trading_market("m2", 20));
        let f = fixture(loader, MockConnection::new("rpc"), fan_out_config());

        settle(|| f.service.open_orders_for_all_markets()).await;
        let loads = f.loader.load_count();
        // m3 is unknown to the loader and fails on every run
        assert_eq!(loads, 3);

        let again = f.service.open_orders_for_all_markets();
        assert!(!again.loading);
        assert_eq!(f.loader.load_count(), loads);
    }

    #[tokio::test]
    async fn test_markets_without_accounts_contribute_nothing() {
        let loader = MockLoader::new()
            .with_market(MockMarket::new("m1").with_orders(vec![order("m1", 1, Side::Buy, 1.0)]))
            .with_market(trading_market("m2", 20))
            .with_market(MockMarket::new("m3"));
        let f = fixture(loader, MockConnection::new("rpc"), fan_out_config());

        let snapshot = settle(|| f.service.open_orders_for_all_markets()).await;

        // m1 has orders but no open-orders account for the owner
        let ids: Vec<u128> = snapshot.value().unwrap().iter().map(|o| o.payload.order_id).collect();
        assert_eq!(ids, vec![20, 21]);
        assert_eq!(f.notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_wallet_balances_fan_out() {
        let loader = MockLoader::new()
            .with_market(MockMarket::new("m1"))
            .with_market(MockMarket::new("m2"))
            .with_market(MockMarket::new("m3"));
        let connection = MockConnection::new("rpc")
            .with_balance(&owner(), &Address::new("m1-quote"), 2_500_000)
            .with_balance(&owner(), &Address::new("m3-base"), 1_000_000);
        let f = fixture(loader, connection, fan_out_config());

        let snapshot = settle(|| f.service.wallet_balances_for_all_markets()).await;
        let balances = snapshot.value().unwrap();

        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].market.address, Address::new("m1"));
        assert_eq!(balances[0].payload.currency, Currency::Quote);
        assert_eq!(balances[0].payload.amount, 2.5);
        assert_eq!(balances[1].payload.mint, Address::new("m3-base"));
    }

    #[tokio::test]
    async fn test_absent_actor_makes_no_remote_calls() {
        let loader = MockLoader::new().with_market(trading_market("m1", 10));
        let f = build(
            active_markets(),
            loader,
            MockConnection::new("rpc"),
            None,
            fan_out_config(),
            Arc::new(MemoryPreferenceStore::new()),
        );
        let market = f.service.selected_market();

        let accounts = f.service.open_orders_accounts(&market);
        let orders = f.service.open_orders(&market);
        let balances = f.service.balances(&market);
        let all_orders = f.service.open_orders_for_all_markets();
        let wallets = f.service.wallet_balances_for_all_markets();
        let residual = f.service.unmigrated_open_orders_accounts();
        let deprecated = f.service.deprecated_market_orders();

        assert!(!accounts.loading && accounts.value().unwrap().is_empty());
        assert!(!orders.loading && orders.value().unwrap().is_empty());
        assert_eq!(balances.value(), Some(&MarketBalances::default()));
        assert!(all_orders.value().unwrap().is_empty());
        assert!(wallets.value().unwrap().is_empty());
        assert!(residual.value().unwrap().is_empty());
        assert!(deprecated.value().unwrap().is_empty());
        assert!(!f.service.refresh_unmigrated(true));

        tokio::task::yield_now().await;
        assert_eq!(f.loader.load_count(), 0);
        assert_eq!(f.connection.call_count(), 0);
        assert!(f.service.cache().is_empty());
        assert_eq!(f.notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_order_book_does_not_need_actor() {
        let book = OrderBook { market: None, bids: vec![(9.0, 1.0), (8.0, 2.0)], asks: vec![(11.0, 1.0)] };
        let loader = MockLoader::new().with_market(MockMarket::new("m1").with_book(book));
        let mut config = DataSyncConfig::default();
        config.order_book_depth = 1;
        let f = build(active_markets(), loader, MockConnection::new("rpc"), None, config, Arc::new(MemoryPreferenceStore::new()));
        let market = f.service.selected_market();

        let snapshot = settle(|| f.service.order_book(&market)).await;
        let book = snapshot.value().unwrap();
        assert_eq!(book.market, Some(Address::new("m1")));
        assert_eq!(book.bids, vec![(9.0, 1.0)]);

        let mark = f.service.mark_price(&market, None);
        assert_eq!(mark.value(), Some(&10.0));
        assert_eq!(f.service.mark_price(&market, Some(10.5)).value(), Some(&10.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_book_subscription_polls_fast_tier() {
        let loader = MockLoader::new().with_market(MockMarket::new("m1"));
        let f = build(active_markets(), loader, MockConnection::new("rpc"), None, DataSyncConfig::default(), Arc::new(MemoryPreferenceStore::new()));
        let market = f.service.selected_market();

        let mut subscription = f.service.subscribe_order_book(&market).unwrap();
        assert!(subscription.next_value().await.is_some());

        // fetched at t=0, refreshed at t=1 and t=2
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(f.loader.load_count(), 3);

        drop(subscription);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.loader.load_count(), 3);
    }

    #[tokio::test]
    async fn test_balances_split_wallet_orders_and_unsettled() {
        let mut account = open_orders_account("m1", &owner(), "v2", 3_000_000, 1_000_000);
        account.base_token_free = 1_000_000;
        let loader = MockLoader::new().with_market(MockMarket::new("m1").with_open_orders(account));
        let connection = MockConnection::new("rpc").with_balance(&owner(), &Address::new("m1-base"), 500_000);
        let f = fixture(loader, connection, DataSyncConfig::default());
        let market = f.service.selected_market();

        let snapshot = settle(|| f.service.balances(&market)).await;
        let balances = snapshot.value().unwrap();

        assert_eq!(balances.base.wallet, Some(0.5));
        assert_eq!(balances.base.orders, Some(2.0));
        assert_eq!(balances.base.unsettled, Some(1.0));
        // no quote token account
        assert_eq!(balances.quote.wallet, None);
        assert_eq!(balances.quote.unsettled, Some(1.0));
    }

    #[tokio::test]
    async fn test_refresh_open_orders_serves_stale_value() {
        let loader = MockLoader::new().with_market(trading_market("m1", 10));
        let f = fixture(loader, MockConnection::new("rpc"), DataSyncConfig::default());
        let market = f.service.selected_market();
        settle(|| f.service.open_orders(&market)).await;
        let loads = f.loader.load_count();

        assert!(f.service.refresh_open_orders(&market));
        let stale = f.service.open_orders(&market);
        assert!(stale.loading);
        assert_eq!(stale.value().unwrap().len(), 2);

        settle(|| f.service.open_orders(&market)).await;
        assert_eq!(f.loader.load_count(), loads + 1);
    }

    #[tokio::test]
    async fn test_fan_out_disabled_reports_loaded_empty() {
        let loader = MockLoader::new().with_market(trading_market("m1", 10));
        let f = fixture(loader, MockConnection::new("rpc"), DataSyncConfig::default());

        let orders = f.service.open_orders_for_all_markets();
        let wallets = f.service.wallet_balances_for_all_markets();

        assert!(!orders.loading && orders.value().unwrap().is_empty());
        assert!(!wallets.loading && wallets.value().unwrap().is_empty());
        tokio::task::yield_now().await;
        assert_eq!(f.loader.load_count(), 0);
        assert!(f.service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_deprecated_orders_fan_out_can_be_disabled() {
        let mut config = DataSyncConfig::default();
        config.fan_out.deprecated_orders_enabled = false;
        let f = fixture(MockLoader::new().with_market(trading_market("m1", 10)), MockConnection::new("rpc"), config);

        let orders = f.service.deprecated_market_orders();

        assert!(!orders.loading && orders.value().unwrap().is_empty());
        // the residual scan is not started either
        assert!(f.service.cache().is_empty());
        assert_eq!(f.connection.call_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_is_notified() {
        let loader = Arc::new(MockLoader::new().with_market(trading_market("m1", 10)));
        let notifier = RecordingNotifier::new();
        let service = MarketDataServiceBuilder::new()
            .with_markets(active_markets())
            .with_loader(loader.clone())
            .with_connection_provider(Arc::new(MockConnectionProvider::unavailable()))
            .with_actor(Arc::new(StaticActor(Some(owner()))))
            .with_notifier(notifier.clone())
            .build()
            .unwrap();
        let market = service.selected_market();

        let orders = service.open_orders(&market);
        let book = service.order_book(&market);

        assert!(orders.is_loaded() && orders.value().unwrap().is_empty());
        assert_eq!(book.value(), Some(&OrderBook::default()));
        // one outage, one notification
        assert_eq!(notifier.count(), 1);
        assert_eq!(notifier.all()[0].severity, Severity::Error);
        assert_eq!(loader.load_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_outage_notified_once_until_restored() {
        let loader = Arc::new(MockLoader::new().with_market(trading_market("m1", 10)));
        let provider = Arc::new(MockConnectionProvider::new(Arc::new(MockConnection::new("rpc"))));
        let notifier = RecordingNotifier::new();
        let service = MarketDataServiceBuilder::new()
            .with_markets(active_markets())
            .with_loader(loader.clone())
            .with_connection_provider(provider.clone())
            .with_actor(Arc::new(StaticActor(Some(owner()))))
            .with_notifier(notifier.clone())
            .build()
            .unwrap();
        let market = service.selected_market();

        provider.set_down(true);
        for _ in 0..10 {
            assert!(service.open_orders(&market).is_loaded());
        }
        assert_eq!(notifier.count(), 1);

        provider.set_down(false);
        service.open_orders(&market);
        assert_eq!(notifier.count(), 1);

        provider.set_down(true);
        service.open_orders(&market);
        service.order_book(&market);
        assert_eq!(notifier.count(), 2);
    }

    #[test]
    fn test_deprecated_selection_is_redirected() {
        let markets = vec![
            MarketDescriptor::new("old-srm", "SRM/USDT", "v1").deprecated(),
            MarketDescriptor::new("btc", "BTC/USDT", "v2"),
            MarketDescriptor::new("srm", "SRM/USDT", "v2"),
        ];
        let preferences: Arc<dyn PreferenceStore> = Arc::new(MemoryPreferenceStore::new());
        preferences.set(SELECTED_MARKET_KEY, &Address::new("old-srm")).unwrap();

        let f = build(markets.clone(), MockLoader::new(), MockConnection::new("rpc"), None, DataSyncConfig::default(), preferences.clone());

        assert_eq!(f.service.selected_market().address, Address::new("srm"));
        assert_eq!(preferences.get_or::<Option<Address>>(SELECTED_MARKET_KEY, None), Some(Address::new("srm")));
        assert_eq!(f.notifier.count(), 1);
        assert_eq!(f.notifier.all()[0].severity, Severity::Warning);
        assert_eq!(default_market(&markets, "SRM/USDT").unwrap().address, Address::new("srm"));
    }

    #[test]
    fn test_selection_management() {
        let f = build(
            active_markets(),
            MockLoader::new(),
            MockConnection::new("rpc"),
            None,
            DataSyncConfig::default(),
            Arc::new(MemoryPreferenceStore::new()),
        );
        assert_eq!(f.service.selected_market().address, Address::new("m1"));

        assert!(matches!(f.service.select_market(&Address::new("nope")), Err(crate::error::SyncError::UnknownMarket(_))));

        f.service.add_custom_market(MarketDescriptor::new("mine", "MINE/USDT", "v2")).unwrap();
        assert_eq!(f.service.markets().len(), 4);
        f.service.select_market(&Address::new("mine")).unwrap();
        assert_eq!(f.service.registry().selected_address(), Some(Address::new("mine")));

        assert!(f.service.remove_custom_market(&Address::new("mine")).unwrap());
        assert_eq!(f.service.selected_market().address, Address::new("m1"));
        assert!(!f.service.remove_custom_market(&Address::new("m2")).unwrap());
    }

    fn migration_fixture() -> Fixture {
        let markets = vec![
            MarketDescriptor::new("m1", "SRM/USDT", "v2"),
            MarketDescriptor::new("old-srm", "SRM/USDT", "v0").deprecated(),
            MarketDescriptor::new("old-btc", "BTC/USDT", "v1").deprecated(),
        ];
        let connection = MockConnection::new("rpc")
            .with_legacy_accounts(
                "v0",
                vec![
                    open_orders_account("old-srm", &owner(), "v0", 4_000_000, 0),
                    open_orders_account("old-dust", &owner(), "v0", 0, 0),
                ],
            )
            .failing_program("v1");
        let loader = MockLoader::new().with_market(trading_market("old-srm", 70));
        build(markets, loader, connection, Some(owner()), DataSyncConfig::default(), Arc::new(MemoryPreferenceStore::new()))
    }

    #[tokio::test]
    async fn test_residual_scan_survives_failing_program() {
        let f = migration_fixture();

        let snapshot = settle(|| f.service.unmigrated_open_orders_accounts()).await;
        let scan = snapshot.value().unwrap();

        assert_eq!(scan.accounts.len(), 1);
        assert_eq!(scan.accounts[0].market, Address::new("old-srm"));
        assert_eq!(scan.failed_programs, vec![Address::new("v1")]);
        assert_eq!(f.connection.call_count(), 2);
        assert_eq!(f.notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_deprecated_market_orders_follow_residual_scan() {
        let f = migration_fixture();

        let snapshot = settle(|| f.service.deprecated_market_orders()).await;
        let orders = snapshot.value().unwrap();

        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.market.address == Address::new("old-srm")));
        assert!(orders[0].market.deprecated);
    }

    #[tokio::test]
    async fn test_refresh_unmigrated_clear_refetches() {
        let f = migration_fixture();
        settle(|| f.service.unmigrated_open_orders_accounts()).await;
        assert_eq!(f.connection.call_count(), 2);

        // fresh entry on the very slow tier is served from cache
        settle(|| f.service.unmigrated_open_orders_accounts()).await;
        assert_eq!(f.connection.call_count(), 2);

        assert!(f.service.refresh_unmigrated(true));
        let cleared = f.service.unmigrated_open_orders_accounts();
        assert!(cleared.loading);
        assert!(cleared.value.is_none());

        settle(|| f.service.unmigrated_open_orders_accounts()).await;
        assert_eq!(f.connection.call_count(), 4);
    }
}
