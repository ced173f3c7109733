use crate::cache::tier::TierIntervals;
use crate::data_sync::markets::MarketDescriptor;
use crate::utils::config_loader::{ConfigLoader, ConfigLoaderSync, LoadConfigError, load_from_file, load_from_file_sync};
use crate::utils::constants::{DEFAULT_MARKET_NAME, DEFAULT_ORDER_BOOK_DEPTH};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Per-call-site switches for the all-markets fan-outs. A disabled call site reports a
/// loaded, empty result without touching the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FanOutConfig {
    pub open_orders_enabled: bool,
    pub wallet_balances_enabled: bool,
    pub deprecated_orders_enabled: bool,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        // all-market polling is expensive on public RPC; opt in explicitly
        Self { open_orders_enabled: false, wallet_balances_enabled: false, deprecated_orders_enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarketsConfig {
    /// Selection key for the default market (canonical name)
    pub default_market: String,
    pub list: Vec<MarketDescriptor>,
}

impl Default for MarketsConfig {
    fn default() -> Self {
        Self { default_market: DEFAULT_MARKET_NAME.to_string(), list: Vec::new() }
    }
}

/// Configuration for the data-freshness layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSyncConfig {
    pub cache: TierIntervals,
    pub fan_out: FanOutConfig,
    pub markets: MarketsConfig,
    /// Price levels kept per side of the order book
    pub order_book_depth: usize,
}

impl Default for DataSyncConfig {
    fn default() -> Self {
        Self {
            cache: TierIntervals::default(),
            fan_out: FanOutConfig::default(),
            markets: MarketsConfig::default(),
            order_book_depth: DEFAULT_ORDER_BOOK_DEPTH,
        }
    }
}

impl DataSyncConfig {
    /// Defaults overlaid with environment variables
    pub fn from_env() -> eyre::Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay environment variables on this configuration.
    pub fn apply_env(&mut self) -> eyre::Result<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Overlay variables read through `lookup`.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> eyre::Result<()> {
        if let Some(secs) = parse_var::<u64>(&lookup, "VERY_SLOW_REFRESH_SECS")? {
            self.cache.very_slow_secs = secs;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "SLOW_REFRESH_SECS")? {
            self.cache.slow_secs = secs;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "FAST_REFRESH_SECS")? {
            self.cache.fast_secs = secs;
        }

        if let Some(enabled) = parse_var::<bool>(&lookup, "FAN_OUT_OPEN_ORDERS")? {
            self.fan_out.open_orders_enabled = enabled;
        }

        if let Some(enabled) = parse_var::<bool>(&lookup, "FAN_OUT_WALLET_BALANCES")? {
            self.fan_out.wallet_balances_enabled = enabled;
        }

        if let Some(default_market) = lookup("DEFAULT_MARKET") {
            self.markets.default_market = default_market.trim().to_string();
        }

        Ok(())
    }

    /// Reject configurations the layer cannot run with.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.cache.fast_secs == 0 {
            return Err(eyre::eyre!("cache.fast_secs must be greater than zero"));
        }

        if self.order_book_depth == 0 {
            return Err(eyre::eyre!("order_book_depth must be greater than zero"));
        }

        if !self.markets.list.is_empty()
            && !self.markets.list.iter().any(|m| m.is_active() && m.name == self.markets.default_market)
        {
            return Err(eyre::eyre!("default market {:?} is not an active built-in market", self.markets.default_market));
        }

        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> eyre::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| eyre::eyre!("Invalid {}: {}", name, e)),
        None => Ok(None),
    }
}

#[async_trait]
impl ConfigLoader for DataSyncConfig {
    type SectionType = DataSyncConfig;

    async fn load_section_from_file(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        load_from_file(file_name).await
    }
}

impl ConfigLoaderSync for DataSyncConfig {
    type SectionType = DataSyncConfig;

    fn load_section_from_file_sync(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        load_from_file_sync(file_name)
    }
}
