//! Test doubles for the collaborator ports.

use crate::address::Address;
use crate::data_sync::markets::MarketDescriptor;
use crate::data_sync::types::{OpenOrdersAccount, Order, OrderBook, Side};
use crate::notify::{Notification, Notifier};
use crate::ports::{Connection, ConnectionProvider, MarketHandle, MarketLoader};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use eyre::{Result, eyre};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.notifications.lock().len()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

pub(crate) fn open_orders_account(
    market: &str,
    owner: &Address,
    program_id: &str,
    base_total: u64,
    quote_total: u64,
) -> OpenOrdersAccount {
    OpenOrdersAccount {
        address: Address::new(format!("oo-{market}-{owner}")),
        market: Address::new(market),
        owner: owner.clone(),
        program_id: Address::new(program_id),
        base_token_free: base_total,
        base_token_total: base_total,
        quote_token_free: quote_total,
        quote_token_total: quote_total,
    }
}

pub(crate) fn order(market: &str, order_id: u128, side: Side, price: f64) -> Order {
    Order {
        order_id,
        market: Address::new(market),
        side,
        price,
        size: 1.0,
        open_orders_address: Address::new(format!("oo-{market}")),
    }
}

#[derive(Clone)]
pub(crate) struct MockMarket {
    pub address: Address,
    pub base_mint: Address,
    pub quote_mint: Address,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub open_orders: Vec<OpenOrdersAccount>,
    pub orders: Vec<Order>,
    pub book: OrderBook,
    pub fail_orders: bool,
    pub calls: Arc<AtomicUsize>,
}

impl MockMarket {
    pub fn new(address: &str) -> Self {
        Self {
            address: Address::new(address),
            base_mint: Address::new(format!("{address}-base")),
            quote_mint: Address::new(format!("{address}-quote")),
            base_decimals: 6,
            quote_decimals: 6,
            open_orders: Vec::new(),
            orders: Vec::new(),
            book: OrderBook::default(),
            fail_orders: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_open_orders(mut self, account: OpenOrdersAccount) -> Self {
        self.open_orders.push(account);
        self
    }

    pub fn with_orders(mut self, orders: Vec<Order>) -> Self {
        self.orders = orders;
        self
    }

    pub fn with_book(mut self, book: OrderBook) -> Self {
        self.book = book;
        self
    }

    pub fn failing_orders(mut self) -> Self {
        self.fail_orders = true;
        self
    }
}

#[async_trait]
impl MarketHandle for MockMarket {
    fn address(&self) -> &Address {
        &self.address
    }

    fn base_mint(&self) -> &Address {
        &self.base_mint
    }

    fn quote_mint(&self) -> &Address {
        &self.quote_mint
    }

    fn base_decimals(&self) -> u8 {
        self.base_decimals
    }

    fn quote_decimals(&self) -> u8 {
        self.quote_decimals
    }

    async fn find_open_orders_accounts_for_owner(&self, owner: &Address) -> Result<Vec<OpenOrdersAccount>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.open_orders.iter().filter(|a| &a.owner == owner).cloned().collect())
    }

    async fn load_orders_for_owner(&self, _owner: &Address) -> Result<Vec<Order>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_orders {
            return Err(eyre!("RPC error loading orders for {}", self.address));
        }
        Ok(self.orders.clone())
    }

    async fn load_order_book(&self, depth: usize) -> Result<OrderBook> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.book.clone().truncated(depth))
    }
}

#[derive(Default)]
pub(crate) struct MockLoader {
    markets: DashMap<Address, MockMarket>,
    failing: DashSet<Address>,
    pub loads: AtomicUsize,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_market(self, market: MockMarket) -> Self {
        self.markets.insert(market.address.clone(), market);
        self
    }

    pub fn failing_on(self, address: &str) -> Self {
        self.failing.insert(Address::new(address));
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketLoader for MockLoader {
    async fn load(&self, _connection: Arc<dyn Connection>, market: &MarketDescriptor) -> Result<Arc<dyn MarketHandle>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&market.address) {
            return Err(eyre!("invalid market account {}", market.address));
        }
        self.markets
            .get(&market.address)
            .map(|m| Arc::new(m.value().clone()) as Arc<dyn MarketHandle>)
            .ok_or_else(|| eyre!("market {} not found", market.address))
    }
}

pub(crate) struct MockConnection {
    endpoint: String,
    legacy: DashMap<Address, Vec<OpenOrdersAccount>>,
    failing_programs: DashSet<Address>,
    balances: DashMap<(Address, Address), u64>,
    pub calls: AtomicUsize,
}

impl MockConnection {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            legacy: DashMap::new(),
            failing_programs: DashSet::new(),
            balances: DashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_legacy_accounts(self, program_id: &str, accounts: Vec<OpenOrdersAccount>) -> Self {
        self.legacy.insert(Address::new(program_id), accounts);
        self
    }

    pub fn failing_program(self, program_id: &str) -> Self {
        self.failing_programs.insert(Address::new(program_id));
        self
    }

    pub fn with_balance(self, owner: &Address, mint: &Address, amount: u64) -> Self {
        self.balances.insert((owner.clone(), mint.clone()), amount);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn find_open_orders_for_owner(&self, owner: &Address, program_id: &Address) -> Result<Vec<OpenOrdersAccount>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_programs.contains(program_id) {
            return Err(eyre!("getProgramAccounts failed for {}", program_id));
        }
        Ok(self
            .legacy
            .get(program_id)
            .map(|accounts| accounts.iter().filter(|a| &a.owner == owner).cloned().collect())
            .unwrap_or_default())
    }

    async fn token_balance(&self, owner: &Address, mint: &Address) -> Result<Option<u64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.balances.get(&(owner.clone(), mint.clone())).map(|b| *b.value()))
    }
}

pub(crate) struct MockConnectionProvider {
    connection: Option<Arc<MockConnection>>,
    down: AtomicBool,
}

impl MockConnectionProvider {
    pub fn new(connection: Arc<MockConnection>) -> Self {
        Self { connection: Some(connection), down: AtomicBool::new(false) }
    }

    pub fn unavailable() -> Self {
        Self { connection: None, down: AtomicBool::new(false) }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

impl ConnectionProvider for MockConnectionProvider {
    fn connection(&self) -> Result<Arc<dyn Connection>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(eyre!("RPC endpoint unreachable"));
        }
        self.connection
            .clone()
            .map(|c| c as Arc<dyn Connection>)
            .ok_or_else(|| eyre!("no RPC endpoint configured"))
    }
}
