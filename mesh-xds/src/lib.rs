pub mod metrics;
pub mod types;

pub use types::*;
