//! Seams between the coordinator and the services it drives

use crate::models::{Coin, CoinDetail, LoadedImage};
use crate::types::MarketQuery;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Primary, slow, rich market data (paginated snapshot + detail)
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_market_snapshot(&self, query: &MarketQuery) -> Result<Vec<Coin>>;

    async fn fetch_detail(&self, id: &str) -> Result<CoinDetail>;
}

/// Secondary low-latency quotes and logo probing. Never fails hard.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Overwrite price fields of coins with a fresh quote; pass the rest through
    async fn update_coins(&self, coins: Vec<Coin>) -> Vec<Coin>;

    /// Uppercased symbol -> first candidate logo URL that answered
    async fn discover_best_logo_urls(&self, symbols: &[String]) -> HashMap<String, String>;
}

/// A persistent streaming price connection.
///
/// Ticks and status changes are delivered on the event channel handed out
/// when the stream was constructed.
pub trait PriceStream: Send + Sync {
    /// Open the connection. No-op when already running.
    fn connect(&self);

    /// Replace the active subscription set
    fn subscribe(&self, symbols: Vec<String>);

    /// Close for good; no automatic reconnection afterwards
    fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

/// Image loading with fallback; always yields an image
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn load(&self, url: &str, symbol_hint: &str) -> LoadedImage;

    /// Drop the memory tier (low-memory signal)
    fn clear_memory(&self);
}
