//! Deprecated-market handling: default selection, redirecting stale selections and
//! discovering funds left behind in legacy programs.

use crate::address::Address;
use crate::data_sync::markets::{MarketDescriptor, MarketRegistry};
use crate::data_sync::types::ResidualScan;
use crate::error::{SyncError, SyncResult};
use crate::notify::{Notification, Notifier};
use crate::ports::Connection;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// First active market named `key`, else the first active market at all.
/// A deprecated descriptor is never returned.
pub fn default_market<'a>(markets: &'a [MarketDescriptor], key: &str) -> Option<&'a MarketDescriptor> {
    markets
        .iter()
        .find(|m| m.is_active() && m.name == key)
        .or_else(|| markets.iter().find(|m| m.is_active()))
}

#[derive(Clone, Debug, PartialEq)]
pub enum SelectionOutcome {
    /// The persisted selection is active and known
    Kept(MarketDescriptor),
    /// The persisted selection points at a deprecated market
    Redirected { from: MarketDescriptor, to: MarketDescriptor },
    /// Nothing selected yet, or the selection is no longer listed
    Defaulted(MarketDescriptor),
}

impl SelectionOutcome {
    pub fn market(&self) -> &MarketDescriptor {
        match self {
            SelectionOutcome::Kept(market) | SelectionOutcome::Defaulted(market) => market,
            SelectionOutcome::Redirected { to, .. } => to,
        }
    }

    pub fn into_market(self) -> MarketDescriptor {
        match self {
            SelectionOutcome::Kept(market) | SelectionOutcome::Defaulted(market) => market,
            SelectionOutcome::Redirected { to, .. } => to,
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, SelectionOutcome::Redirected { .. })
    }
}

pub fn resolve_selection(
    selected: Option<&Address>,
    markets: &[MarketDescriptor],
    key: &str,
) -> SyncResult<SelectionOutcome> {
    let current = selected.and_then(|address| markets.iter().find(|m| &m.address == address));
    if let Some(market) = current.filter(|m| m.is_active()) {
        return Ok(SelectionOutcome::Kept(market.clone()));
    }

    let fallback = default_market(markets, key).cloned().ok_or_else(|| SyncError::NoDefaultMarket(key.to_string()))?;
    Ok(match current {
        Some(deprecated) => SelectionOutcome::Redirected { from: deprecated.clone(), to: fallback },
        None => SelectionOutcome::Defaulted(fallback),
    })
}

/// Query every deprecated program for the owner's open-orders accounts and keep the ones
/// still holding funds. A failing program is logged and recorded, the scan goes on.
pub async fn discover_residual(connection: &dyn Connection, owner: &Address, program_ids: &[Address]) -> ResidualScan {
    let mut scan = ResidualScan::default();
    for program_id in program_ids {
        match connection.find_open_orders_for_owner(owner, program_id).await {
            Ok(accounts) => {
                let total = accounts.len();
                scan.accounts.extend(accounts.into_iter().filter(|a| a.has_residual_balance()));
                debug!("Program {}: {} legacy accounts, {} with funds so far", program_id, total, scan.accounts.len());
            }
            Err(e) => {
                warn!("Legacy open-orders query failed for program {}: {:#}", program_id, e);
                scan.failed_programs.push(program_id.clone());
            }
        }
    }
    scan
}

/// Applies the selection policy against a registry and notifies the user on redirects.
#[derive(Clone)]
pub struct MigrationResolver {
    notifier: Arc<dyn Notifier>,
}

impl MigrationResolver {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Resolve the persisted selection. A redirect away from a deprecated market is
    /// written back to the registry and reported as a warning.
    pub fn resolve(&self, registry: &MarketRegistry, key: &str) -> SyncResult<SelectionOutcome> {
        let selected = registry.selected_address();
        let outcome = resolve_selection(selected.as_ref(), &registry.markets(), key)?;

        match &outcome {
            SelectionOutcome::Kept(market) => debug!("Keeping selected market {} ({})", market.name, market.address),
            SelectionOutcome::Defaulted(market) => {
                info!("Selecting default market {} ({})", market.name, market.address);
                registry.set_selected(&market.address)?;
            }
            SelectionOutcome::Redirected { from, to } => {
                info!("Selected market {} ({}) is deprecated, switching to {}", from.name, from.address, to.address);
                registry.set_selected(&to.address)?;
                self.notifier.notify(Notification::warning(
                    format!("{} market is deprecated", from.name),
                    format!("Switched to the current {} market {}", to.name, to.address),
                ));
            }
        }
        Ok(outcome)
    }

    pub async fn discover_residual(
        &self,
        connection: &dyn Connection,
        owner: &Address,
        registry: &MarketRegistry,
    ) -> ResidualScan {
        discover_residual(connection, owner, &registry.deprecated_program_ids()).await
    }
}
