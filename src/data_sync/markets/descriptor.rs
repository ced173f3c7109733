use crate::address::Address;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum MarketStatus {
    Active,
    Deprecated,
}

/// One independently queryable market. Immutable once built from configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketDescriptor {
    pub address: Address,
    pub name: String,
    pub program_id: Address,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_label: Option<String>,
}

impl MarketDescriptor {
    pub fn new(address: impl Into<Address>, name: impl Into<String>, program_id: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            program_id: program_id.into(),
            deprecated: false,
            base_label: None,
            quote_label: None,
        }
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn with_labels(mut self, base: impl Into<String>, quote: impl Into<String>) -> Self {
        self.base_label = Some(base.into());
        self.quote_label = Some(quote.into());
        self
    }

    pub fn status(&self) -> MarketStatus {
        if self.deprecated { MarketStatus::Deprecated } else { MarketStatus::Active }
    }

    pub fn is_active(&self) -> bool {
        !self.deprecated
    }

    /// Base label, falling back to the left half of `BASE/QUOTE` names.
    pub fn base_label(&self) -> Option<String> {
        self.base_label.clone().or_else(|| self.name.split_once('/').map(|(base, _)| base.to_string()))
    }

    pub fn quote_label(&self) -> Option<String> {
        self.quote_label.clone().or_else(|| self.name.split_once('/').map(|(_, quote)| quote.to_string()))
    }
}
