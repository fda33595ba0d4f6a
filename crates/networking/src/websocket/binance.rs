//! Binance combined-stream 24h ticker feed

use coinfeed_core::{Error, PriceTick, Result, StreamProviderKind};
use serde::Deserialize;
use serde_json::Value;

use super::provider::{ProviderMessage, StreamProvider, SubscriptionMode};

/// Ticker payload; only the fields we use
#[derive(Debug, Deserialize)]
struct TickerPayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "P")]
    change_percent: String,
}

pub struct BinanceProvider {
    base_url: String,
}

impl BinanceProvider {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn stream_name(symbol: &str) -> Option<String> {
        let symbol = symbol.trim().to_lowercase();
        if symbol.is_empty() || symbol == "usdt" {
            return None;
        }
        Some(format!("{}usdt@ticker", symbol))
    }

    fn decode_ticker(payload: &Value) -> Result<ProviderMessage> {
        let ticker = TickerPayload::deserialize(payload)
            .map_err(|e| Error::Decoding(format!("binance ticker: {}", e)))?;
        PriceTick::from_ticker(&ticker.symbol, &ticker.last_price, &ticker.change_percent)
            .map(ProviderMessage::Price)
            .ok_or_else(|| Error::Decoding(format!("binance price for {}", ticker.symbol)))
    }
}

impl StreamProvider for BinanceProvider {
    fn kind(&self) -> StreamProviderKind {
        StreamProviderKind::Binance
    }

    fn subscription_mode(&self) -> SubscriptionMode {
        SubscriptionMode::Reconnect
    }

    fn connect_url(&self, symbols: &[String]) -> String {
        let streams: Vec<String> = symbols.iter().filter_map(|s| Self::stream_name(s)).collect();
        if streams.is_empty() {
            format!("{}/ws", self.base_url)
        } else {
            format!("{}/stream?streams={}", self.base_url, streams.join("/"))
        }
    }

    fn decode(&self, text: &str) -> Result<ProviderMessage> {
        let value: Value = serde_json::from_str(text)?;

        if let Some(data) = value.get("data") {
            return Self::decode_ticker(data);
        }
        if value.get("s").is_some() {
            return Self::decode_ticker(&value);
        }
        if value.get("id").is_some() && value.get("result").is_some() {
            return Ok(ProviderMessage::SubscribeAck);
        }

        Ok(ProviderMessage::Other)
    }
}
