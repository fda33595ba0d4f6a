//! Notifications pushed to consumers of the coordinator

use coinfeed_core::{Coin, Error};

/// Consumer-facing market notification.
///
/// Delivered over a broadcast channel; each consumer drives its own
/// receiver on the execution context it wants notifications on.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    /// Full replacement of the coin list
    CoinsUpdated(Vec<Coin>),
    /// Incremental update of one coin
    CoinUpdated(Coin),
    /// Unrecoverable fetch failure; the table was left as it was
    Error(Error),
    ConnectionChanged(bool),
}
