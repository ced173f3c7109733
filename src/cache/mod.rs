/// Freshness Layer: fingerprint-keyed async cache
///
/// - Structural fingerprints identifying one logical query
/// - Request coalescing (one in-flight fetch per fingerprint)
/// - Stale-while-revalidate reads with generation-checked completions
/// - Per-entry polling while consumers are subscribed
pub mod async_cache;
mod entry;
pub mod fingerprint;
pub mod scheduler;
pub mod tier;


pub use async_cache::{AsyncDataCache, CacheStats, Snapshot};
pub use fingerprint::{Fingerprint, Part, SharedRef};
pub use scheduler::Subscription;
pub use tier::{FetchOptions, RefreshTier, TierIntervals};
