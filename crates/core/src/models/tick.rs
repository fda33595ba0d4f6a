//! Streaming price ticks and connection events

use serde::{Deserialize, Serialize};

/// Quote-currency suffixes stripped from exchange tickers, longest first
pub const QUOTE_SUFFIXES: &[&str] = &["USDT", "BUSD", "USDC", "USD"];

/// Strip a known quote-currency suffix ("ETHUSDT" -> "ETH").
///
/// A ticker that consists only of a suffix is returned unchanged.
pub fn strip_quote_suffix(ticker: &str) -> &str {
    QUOTE_SUFFIXES
        .iter()
        .find_map(|suffix| ticker.strip_suffix(suffix))
        .filter(|base| !base.is_empty())
        .unwrap_or(ticker)
}

/// A single incremental price update for a base symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    pub change_percent: Option<f64>,
}

impl PriceTick {
    /// Build a tick from a raw exchange ticker and numeric strings
    pub fn from_ticker(ticker: &str, price: &str, change_percent: &str) -> Option<Self> {
        let price = price.trim().parse::<f64>().ok().filter(|p| p.is_finite())?;
        let change_percent = change_percent
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|c| c.is_finite());
        Some(Self {
            symbol: strip_quote_suffix(&ticker.to_uppercase()).to_string(),
            price,
            change_percent,
        })
    }
}

/// Events pushed by a stream connection to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Tick(PriceTick),
    /// Connection status change; `error` is `None` for a clean close
    Status {
        connected: bool,
        error: Option<String>,
    },
}
