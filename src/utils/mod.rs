pub mod config_loader;
pub mod constants;
pub mod preferences;

pub use config_loader::*;
pub use constants::*;
pub use preferences::{JsonFilePreferenceStore, MemoryPreferenceStore, PreferenceStore};
