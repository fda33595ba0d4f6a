//! Coinfeed Core - Shared data models, types, config, and errors

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;
pub mod types;

pub use config::MarketDataConfig;
pub use errors::{Error, Result};
pub use models::*;
pub use types::*;
