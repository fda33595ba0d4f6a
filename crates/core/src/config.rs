//! Runtime configuration for the market-data services

use crate::types::{MarketQuery, PriceChangeWindow, StreamProviderKind};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REST_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_QUOTE_BASE_URL: &str = "https://api.binance.com/api/v3";
pub const DEFAULT_BINANCE_STREAM_URL: &str = "wss://stream.binance.com:9443";
pub const DEFAULT_CRYPTOCOMPARE_STREAM_URL: &str = "wss://streamer.cryptocompare.com/v2";

/// Market-data configuration. Every field has a production default, so a
/// partial JSON document is enough to override a few values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarketDataConfig {
    pub rest_base_url: String,
    pub rest_api_key: Option<String>,
    pub quote_base_url: String,
    /// Reference-currency suffixes recognized in the bulk ticker feed
    pub quote_currencies: Vec<String>,

    pub stream_provider: StreamProviderKind,
    pub binance_stream_url: String,
    pub cryptocompare_stream_url: String,
    pub cryptocompare_api_key: Option<String>,

    pub vs_currency: String,
    pub price_change_window: PriceChangeWindow,
    pub page_size: u32,

    pub backup_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_delay_secs: u64,
    pub subscribe_retry_delay_ms: u64,

    pub image_memory_max_entries: usize,
    pub image_memory_max_bytes: usize,
    pub image_cache_dir: Option<PathBuf>,
    /// Ordered logo sources; `{symbol}` is lowercase, `{SYMBOL}` uppercase
    pub logo_fallback_templates: Vec<String>,

    /// Run a fast-quote pass over each fresh snapshot
    pub merge_fast_quotes: bool,
    /// Buffered notifications per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            rest_base_url: DEFAULT_REST_BASE_URL.to_string(),
            rest_api_key: None,
            quote_base_url: DEFAULT_QUOTE_BASE_URL.to_string(),
            quote_currencies: vec!["USDT".to_string()],
            stream_provider: StreamProviderKind::Binance,
            binance_stream_url: DEFAULT_BINANCE_STREAM_URL.to_string(),
            cryptocompare_stream_url: DEFAULT_CRYPTOCOMPARE_STREAM_URL.to_string(),
            cryptocompare_api_key: None,
            vs_currency: "usd".to_string(),
            price_change_window: PriceChangeWindow::Day,
            page_size: 100,
            backup_interval_secs: 60,
            request_timeout_secs: 30,
            reconnect_delay_secs: 5,
            max_reconnect_delay_secs: 60,
            subscribe_retry_delay_ms: 500,
            image_memory_max_entries: 100,
            image_memory_max_bytes: 50 * 1024 * 1024,
            image_cache_dir: None,
            logo_fallback_templates: vec![
                "https://assets.coincap.io/assets/icons/{symbol}@2x.png".to_string(),
                "https://cryptoicons.org/api/icon/{symbol}/200".to_string(),
                "https://raw.githubusercontent.com/spothq/cryptocurrency-icons/master/128/color/{symbol}.png"
                    .to_string(),
                "https://cryptologos.cc/logos/{symbol}-{symbol}-logo.png".to_string(),
            ],
            merge_fast_quotes: true,
            event_capacity: 256,
        }
    }
}

impl MarketDataConfig {
    /// Parse a (possibly partial) JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make timers or pagination meaningless
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::InvalidRequest("pageSize must be positive".into()));
        }
        if self.backup_interval_secs == 0 {
            return Err(Error::InvalidRequest(
                "backupIntervalSecs must be positive".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::InvalidRequest(
                "requestTimeoutSecs must be positive".into(),
            ));
        }
        if self.reconnect_delay_secs == 0 {
            return Err(Error::InvalidRequest(
                "reconnectDelaySecs must be positive".into(),
            ));
        }
        if self.subscribe_retry_delay_ms == 0 {
            return Err(Error::InvalidRequest(
                "subscribeRetryDelayMs must be positive".into(),
            ));
        }
        if self.max_reconnect_delay_secs < self.reconnect_delay_secs {
            return Err(Error::InvalidRequest(
                "maxReconnectDelaySecs must be >= reconnectDelaySecs".into(),
            ));
        }
        if self.quote_currencies.is_empty() {
            return Err(Error::InvalidRequest(
                "at least one quote currency is required".into(),
            ));
        }
        Ok(())
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_delay_secs)
    }

    pub fn subscribe_retry_delay(&self) -> Duration {
        Duration::from_millis(self.subscribe_retry_delay_ms)
    }

    /// First snapshot page as configured
    pub fn market_query(&self) -> MarketQuery {
        MarketQuery::first_page(&self.vs_currency, self.price_change_window, self.page_size)
    }

    /// Expand every fallback template for `symbol`
    pub fn logo_candidates(&self, symbol: &str) -> Vec<String> {
        let lower = symbol.to_lowercase();
        let upper = symbol.to_uppercase();
        self.logo_fallback_templates
            .iter()
            .map(|t| t.replace("{symbol}", &lower).replace("{SYMBOL}", &upper))
            .collect()
    }
}
