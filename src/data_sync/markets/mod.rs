pub mod descriptor;
pub mod registry;

pub use descriptor::{MarketDescriptor, MarketStatus};
pub use registry::MarketRegistry;
