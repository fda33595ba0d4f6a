//! Coinfeed Engine - market data coordination

pub mod coordinator;

pub use coordinator::{MarketDataCoordinator, MarketEvent, MarketServices};
