/// Preference key holding the user-added market overlay.
pub const CUSTOM_MARKETS_KEY: &str = "customMarkets";

/// Preference key holding the last selected market address.
pub const SELECTED_MARKET_KEY: &str = "marketAddress";

pub const DEFAULT_MARKET_NAME: &str = "SRM/USDT";

// Refresh tiers, seconds
pub const VERY_SLOW_REFRESH_SECS: u64 = 5_000;
pub const SLOW_REFRESH_SECS: u64 = 5;
pub const FAST_REFRESH_SECS: u64 = 1;

pub const DEFAULT_ORDER_BOOK_DEPTH: usize = 20;
