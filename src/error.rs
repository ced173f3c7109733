use crate::address::Address;
use crate::utils::config_loader::LoadConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A market failed to load into a live handle (bad address, RPC error).
    #[error("failed to load market {market}: {reason}")]
    SourceResolution { market: String, reason: String },
    /// A loaded market's data query failed.
    #[error("failed to fetch {operation} for market {market}: {reason}")]
    Fetch { operation: String, market: String, reason: String },
    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(String),
    #[error("unknown market {0}")]
    UnknownMarket(Address),
    #[error("no active market matches default selection key {0:?}")]
    NoDefaultMarket(String),
    #[error("preference store error: {0}")]
    Preference(String),
    #[error(transparent)]
    Config(#[from] LoadConfigError),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
