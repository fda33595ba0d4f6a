//! Shared type definitions

mod symbols;

pub use symbols::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Window over which the snapshot's price-change percentage is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PriceChangeWindow {
    #[serde(rename = "1h")]
    Hour,
    #[default]
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "14d")]
    TwoWeeks,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "200d")]
    TwoHundredDays,
    #[serde(rename = "1y")]
    Year,
}

impl PriceChangeWindow {
    /// Value used for the `price_change_percentage` query parameter
    pub fn as_param(&self) -> &'static str {
        match self {
            PriceChangeWindow::Hour => "1h",
            PriceChangeWindow::Day => "24h",
            PriceChangeWindow::Week => "7d",
            PriceChangeWindow::TwoWeeks => "14d",
            PriceChangeWindow::Month => "30d",
            PriceChangeWindow::TwoHundredDays => "200d",
            PriceChangeWindow::Year => "1y",
        }
    }

    /// Response field holding the percentage for this window
    pub fn response_field(&self) -> String {
        format!("price_change_percentage_{}_in_currency", self.as_param())
    }
}

impl fmt::Display for PriceChangeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

/// Streaming price feed provider, selected at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamProviderKind {
    #[default]
    Binance,
    CryptoCompare,
}

impl fmt::Display for StreamProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamProviderKind::Binance => write!(f, "binance"),
            StreamProviderKind::CryptoCompare => write!(f, "cryptocompare"),
        }
    }
}

impl std::str::FromStr for StreamProviderKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(StreamProviderKind::Binance),
            "cryptocompare" => Ok(StreamProviderKind::CryptoCompare),
            other => Err(crate::Error::InvalidRequest(format!(
                "unknown stream provider: {}",
                other
            ))),
        }
    }
}

/// Market snapshot request parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketQuery {
    pub vs_currency: String,
    pub window: PriceChangeWindow,
    pub page_size: u32,
    pub page: u32,
}

impl MarketQuery {
    pub fn first_page(vs_currency: &str, window: PriceChangeWindow, page_size: u32) -> Self {
        Self {
            vs_currency: vs_currency.to_string(),
            window,
            page_size,
            page: 1,
        }
    }
}
