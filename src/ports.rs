//! Contracts of the collaborators the data layer consumes.
//!
//! The order-book SDK, wallet and RPC plumbing live outside this crate; they are
//! reached only through these traits.

use crate::address::Address;
use crate::data_sync::markets::MarketDescriptor;
use crate::data_sync::types::{OpenOrdersAccount, Order, OrderBook};
use async_trait::async_trait;
use eyre::Result;
use std::sync::Arc;

/// Live handle used to query remote account state.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identity of the connection, part of every fingerprint that depends on it.
    fn endpoint(&self) -> &str;

    /// Open-orders accounts owned by `owner` under `program_id`, across all markets.
    async fn find_open_orders_for_owner(&self, owner: &Address, program_id: &Address) -> Result<Vec<OpenOrdersAccount>>;

    /// Sum of the owner's token accounts for `mint` in native units, `None` when there is no account.
    async fn token_balance(&self, owner: &Address, mint: &Address) -> Result<Option<u64>>;
}

pub trait ConnectionProvider: Send + Sync {
    fn connection(&self) -> Result<Arc<dyn Connection>>;
}

/// Current user identity; `None` while no wallet is connected.
pub trait ActorIdentity: Send + Sync {
    fn current(&self) -> Option<Address>;
}

/// A market resolved to an on-chain handle by the order-book SDK.
#[async_trait]
pub trait MarketHandle: Send + Sync {
    fn address(&self) -> &Address;

    fn base_mint(&self) -> &Address;

    fn quote_mint(&self) -> &Address;

    fn base_decimals(&self) -> u8;

    fn quote_decimals(&self) -> u8;

    async fn find_open_orders_accounts_for_owner(&self, owner: &Address) -> Result<Vec<OpenOrdersAccount>>;

    async fn load_orders_for_owner(&self, owner: &Address) -> Result<Vec<Order>>;

    async fn load_order_book(&self, depth: usize) -> Result<OrderBook>;
}

#[async_trait]
pub trait MarketLoader: Send + Sync {
    /// Resolve `market` (address + program id) into a live handle bound to `connection`.
    async fn load(&self, connection: Arc<dyn Connection>, market: &MarketDescriptor) -> Result<Arc<dyn MarketHandle>>;
}

/// Fixed identity, handy for headless embeddings.
#[derive(Debug, Clone, Default)]
pub struct StaticActor(pub Option<Address>);

impl ActorIdentity for StaticActor {
    fn current(&self) -> Option<Address> {
        self.0.clone()
    }
}
