use super::descriptor::MarketDescriptor;
use crate::address::Address;
use crate::error::SyncResult;
use crate::utils::constants::{CUSTOM_MARKETS_KEY, SELECTED_MARKET_KEY};
use crate::utils::preferences::PreferenceStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Built-in markets plus the user's persisted overlay.
///
/// The overlay is read from the preference store on every call, so two registries
/// sharing a store always agree.
#[derive(Clone)]
pub struct MarketRegistry {
    built_in: Arc<Vec<MarketDescriptor>>,
    store: Arc<dyn PreferenceStore>,
}

impl MarketRegistry {
    pub fn new(built_in: Vec<MarketDescriptor>, store: Arc<dyn PreferenceStore>) -> Self {
        Self { built_in: Arc::new(built_in), store }
    }

    pub fn built_in(&self) -> &[MarketDescriptor] {
        &self.built_in
    }

    pub fn custom(&self) -> Vec<MarketDescriptor> {
        self.store.get_or(CUSTOM_MARKETS_KEY, Vec::new())
    }

    /// User-added markets first, built-ins last.
    pub fn markets(&self) -> Vec<MarketDescriptor> {
        let mut markets = self.custom();
        markets.extend(self.built_in.iter().cloned());
        markets
    }

    /// Add a user market, replacing an existing overlay entry with the same address.
    pub fn add_custom(&self, market: MarketDescriptor) -> SyncResult<()> {
        let mut custom = self.custom();
        custom.retain(|m| m.address != market.address);
        info!("Adding custom market {} ({})", market.name, market.address);
        custom.push(market);
        self.store.set(CUSTOM_MARKETS_KEY, &custom)
    }

    /// Returns whether an overlay entry was removed. Built-ins cannot be removed.
    pub fn remove_custom(&self, address: &Address) -> SyncResult<bool> {
        let mut custom = self.custom();
        let before = custom.len();
        custom.retain(|m| &m.address != address);
        if custom.len() == before {
            debug!("No custom market {} to remove", address);
            return Ok(false);
        }
        self.store.set(CUSTOM_MARKETS_KEY, &custom)?;
        Ok(true)
    }

    pub fn find(&self, address: &Address) -> Option<MarketDescriptor> {
        self.markets().into_iter().find(|m| &m.address == address)
    }

    pub fn find_by_name(&self, name: &str) -> Option<MarketDescriptor> {
        self.markets().into_iter().find(|m| m.name == name)
    }

    pub fn active(&self) -> Vec<MarketDescriptor> {
        self.markets().into_iter().filter(|m| m.is_active()).collect()
    }

    pub fn deprecated(&self) -> Vec<MarketDescriptor> {
        self.markets().into_iter().filter(|m| m.deprecated).collect()
    }

    /// Program ids of deprecated markets, deduplicated in first-seen order.
    pub fn deprecated_program_ids(&self) -> Vec<Address> {
        let mut program_ids: Vec<Address> = Vec::new();
        for market in self.deprecated() {
            if !program_ids.contains(&market.program_id) {
                program_ids.push(market.program_id);
            }
        }
        program_ids
    }

    pub fn selected_address(&self) -> Option<Address> {
        self.store.get_or::<Option<Address>>(SELECTED_MARKET_KEY, None)
    }

    pub fn set_selected(&self, address: &Address) -> SyncResult<()> {
        self.store.set(SELECTED_MARKET_KEY, address)
    }
}
