use crate::utils::constants::{FAST_REFRESH_SECS, SLOW_REFRESH_SECS, VERY_SLOW_REFRESH_SECS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum_macros::{Display, EnumIter, EnumString};

/// Refresh cadence class, always chosen by the caller.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RefreshTier {
    /// Data that almost never changes (deprecated-market discovery)
    VerySlow,
    /// Balances and open orders
    Slow,
    /// Order-book depth
    Fast,
    /// Fetched once, refreshed only by invalidation
    Never,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierIntervals {
    pub very_slow_secs: u64,
    pub slow_secs: u64,
    pub fast_secs: u64,
}

impl Default for TierIntervals {
    fn default() -> Self {
        Self { very_slow_secs: VERY_SLOW_REFRESH_SECS, slow_secs: SLOW_REFRESH_SECS, fast_secs: FAST_REFRESH_SECS }
    }
}

impl TierIntervals {
    pub fn interval(&self, tier: RefreshTier) -> Duration {
        match tier {
            RefreshTier::VerySlow => Duration::from_secs(self.very_slow_secs),
            RefreshTier::Slow => Duration::from_secs(self.slow_secs),
            RefreshTier::Fast => Duration::from_secs(self.fast_secs),
            RefreshTier::Never => Duration::ZERO,
        }
    }
}

/// Per-call cache options.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FetchOptions {
    /// Zero disables background refresh
    pub refresh_interval: Duration,
}

impl FetchOptions {
    pub fn for_tier(tier: RefreshTier, intervals: &TierIntervals) -> Self {
        Self { refresh_interval: intervals.interval(tier) }
    }

    pub fn every(refresh_interval: Duration) -> Self {
        Self { refresh_interval }
    }

    pub fn once() -> Self {
        Self { refresh_interval: Duration::ZERO }
    }

    pub fn refreshes(&self) -> bool {
        !self.refresh_interval.is_zero()
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::once()
    }
}
