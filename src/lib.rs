// Freshness layer and the market data built on it
pub mod cache; // Fingerprint-keyed async cache, polling scheduler, refresh tiers
pub mod data_sync; // Market data service: per-market queries, fan-outs, migration

// Common types and collaborator contracts
pub mod address;
pub mod error;
pub mod notify;
pub mod ports;
pub mod utils;

pub use address::Address;
pub use cache::{AsyncDataCache, CacheStats, FetchOptions, Fingerprint, Part, RefreshTier, Snapshot, Subscription, TierIntervals};
pub use data_sync::{
    AggregatorStats, DataSyncConfig, FanOutAggregator, MarketDataService, MarketDataServiceBuilder, MarketDescriptor,
    MarketRegistry, MarketStatus, MigrationResolver, SelectionOutcome, Sourced,
};
pub use error::{SyncError, SyncResult};
pub use notify::{Notification, Notifier, Severity, TracingNotifier};
pub use ports::{ActorIdentity, Connection, ConnectionProvider, MarketHandle, MarketLoader, StaticActor};
pub use utils::{JsonFilePreferenceStore, MemoryPreferenceStore, PreferenceStore};
