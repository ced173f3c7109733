/// Market Data Layer
///
/// Serves the trading UI's remote reads through the freshness cache:
///
/// - Per-market queries (open orders, balances, order book) on refresh tiers
/// - All-markets fan-outs with per-market failure isolation
/// - Deprecated-market redirects and residual-funds discovery
pub mod aggregator;
pub mod config;
pub mod markets;
pub mod migration;
pub mod service;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

#[cfg(test)]
mod tests;

pub use aggregator::{AggregatorStats, FanOutAggregator, Sourced};
pub use config::{DataSyncConfig, FanOutConfig, MarketsConfig};
pub use markets::{MarketDescriptor, MarketRegistry, MarketStatus};
pub use migration::{MigrationResolver, SelectionOutcome, default_market, discover_residual, resolve_selection};
pub use service::{MarketDataService, MarketDataServiceBuilder};
pub use types::*;
