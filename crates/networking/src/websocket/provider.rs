//! Per-provider URL building, subscription framing and frame decoding

use coinfeed_core::{MarketDataConfig, PriceTick, Result, StreamProviderKind};
use std::sync::Arc;

use super::binance::BinanceProvider;
use super::cryptocompare::CryptoCompareProvider;

/// How a provider changes its subscription set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// Send subscribe/unsubscribe frames on the open connection
    Message,
    /// Subscriptions are part of the URL; reopen the connection
    Reconnect,
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderMessage {
    Price(PriceTick),
    SubscribeAck,
    Welcome,
    /// Valid frame with nothing to act on (heartbeats, partial updates)
    Other,
}

pub trait StreamProvider: Send + Sync + 'static {
    fn kind(&self) -> StreamProviderKind;

    fn subscription_mode(&self) -> SubscriptionMode;

    /// Endpoint to open for the given symbol set
    fn connect_url(&self, symbols: &[String]) -> String;

    /// Frame that adds `symbols` on an open connection
    fn subscribe_message(&self, _symbols: &[String]) -> Option<String> {
        None
    }

    /// Frame that drops `symbols` from an open connection
    fn unsubscribe_message(&self, _symbols: &[String]) -> Option<String> {
        None
    }

    /// Decode one text frame; an error means the frame is dropped
    fn decode(&self, text: &str) -> Result<ProviderMessage>;
}

/// Provider selected by the config
pub fn provider_for(config: &MarketDataConfig) -> Arc<dyn StreamProvider> {
    match config.stream_provider {
        StreamProviderKind::Binance => Arc::new(BinanceProvider::new(&config.binance_stream_url)),
        StreamProviderKind::CryptoCompare => Arc::new(CryptoCompareProvider::new(
            &config.cryptocompare_stream_url,
            config.cryptocompare_api_key.clone(),
            &config.vs_currency,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_selection() {
        let config = MarketDataConfig::default();
        assert_eq!(provider_for(&config).kind(), StreamProviderKind::Binance);

        let config = MarketDataConfig {
            stream_provider: StreamProviderKind::CryptoCompare,
            ..Default::default()
        };
        let provider = provider_for(&config);
        assert_eq!(provider.kind(), StreamProviderKind::CryptoCompare);
        assert_eq!(provider.subscription_mode(), SubscriptionMode::Message);
    }
}
