use crate::address::Address;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// A resting order owned by the actor, already decoded by the order-book SDK.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: u128,
    pub market: Address,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub open_orders_address: Address,
}

/// Per-market account holding the actor's locked and unsettled funds.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpenOrdersAccount {
    pub address: Address,
    pub market: Address,
    pub owner: Address,
    pub program_id: Address,
    /// Native units, free to settle
    pub base_token_free: u64,
    pub base_token_total: u64,
    pub quote_token_free: u64,
    pub quote_token_total: u64,
}

impl OpenOrdersAccount {
    /// True when base or quote funds are still held by the account.
    pub fn has_residual_balance(&self) -> bool {
        self.base_token_total > 0 || self.quote_token_total > 0
    }

    pub fn base_token_locked(&self) -> u64 {
        self.base_token_total.saturating_sub(self.base_token_free)
    }

    pub fn quote_token_locked(&self) -> u64 {
        self.quote_token_total.saturating_sub(self.quote_token_free)
    }
}

/// Aggregated price levels, best first on both sides.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub market: Option<Address>,
    /// (price, size), descending price
    pub bids: Vec<(f64, f64)>,
    /// (price, size), ascending price
    pub asks: Vec<(f64, f64)>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(price, _)| *price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(price, _)| *price)
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    /// Median of best bid, best ask and last trade; degrades to whatever is available.
    pub fn mark_price(&self, last_trade: Option<f64>) -> Option<f64> {
        let mut prices: Vec<f64> =
            [self.best_bid(), self.best_ask(), last_trade].into_iter().flatten().filter(|p| p.is_finite()).collect();
        prices.sort_by(f64::total_cmp);
        match prices.len() {
            0 => None,
            1 => Some(prices[0]),
            2 => Some((prices[0] + prices[1]) / 2.0),
            _ => Some(prices[1]),
        }
    }

    /// Keep at most `depth` levels per side.
    pub fn truncated(mut self, depth: usize) -> Self {
        self.bids.truncate(depth);
        self.asks.truncate(depth);
        self
    }
}

/// Balance of one currency of a market, in UI units.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSummary {
    pub mint: Option<Address>,
    /// Held in the actor's wallet token account; `None` when no account exists
    pub wallet: Option<f64>,
    /// Locked in resting orders
    pub orders: Option<f64>,
    /// Free in the open-orders account, waiting for settlement
    pub unsettled: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketBalances {
    pub market: Option<Address>,
    pub base: BalanceSummary,
    pub quote: BalanceSummary,
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Base,
    Quote,
}

/// Wallet token balance reported by the all-markets fan-out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub mint: Address,
    pub currency: Currency,
    pub amount: f64,
}

/// Result of scanning deprecated programs for accounts that still hold funds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidualScan {
    pub accounts: Vec<OpenOrdersAccount>,
    /// Programs whose legacy query failed during this scan
    pub failed_programs: Vec<Address>,
}

impl ResidualScan {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Distinct market addresses of the residual accounts, in discovery order.
    pub fn markets(&self) -> Vec<Address> {
        let mut markets: Vec<Address> = Vec::new();
        for account in &self.accounts {
            if !markets.contains(&account.market) {
                markets.push(account.market.clone());
            }
        }
        markets
    }
}

/// Convert native token units to UI units.
pub fn to_ui_amount(native: u64, decimals: u8) -> f64 {
    native as f64 / 10f64.powi(decimals as i32)
}
