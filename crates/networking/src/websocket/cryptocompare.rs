//! CryptoCompare streamer (aggregate index channel)

use coinfeed_core::{strip_quote_suffix, Error, PriceTick, Result, StreamProviderKind};
use serde_json::{json, Value};

use super::provider::{ProviderMessage, StreamProvider, SubscriptionMode};

const TYPE_AGGREGATE_INDEX: u64 = 5;
const TYPE_LOAD_COMPLETE: u64 = 3;
const TYPE_SUBSCRIBE_COMPLETE: u64 = 16;
const TYPE_STREAMER_WELCOME: u64 = 20;
const TYPE_WELCOME: u64 = 999;

pub struct CryptoCompareProvider {
    base_url: String,
    api_key: Option<String>,
    to_symbol: String,
}

impl CryptoCompareProvider {
    pub fn new(base_url: &str, api_key: Option<String>, vs_currency: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            to_symbol: vs_currency.to_uppercase(),
        }
    }

    fn subs(&self, symbols: &[String]) -> Vec<String> {
        symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .map(|s| format!("5~CCCAGG~{}~{}", s, self.to_symbol))
            .collect()
    }

    /// TYPE arrives as a string ("5") or a number
    fn message_type(value: &Value) -> Option<u64> {
        match value.get("TYPE")? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    fn decode_price(value: &Value) -> Result<ProviderMessage> {
        let symbol = value
            .get("FROMSYMBOL")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Decoding("cryptocompare update without FROMSYMBOL".into()))?;

        // Flag-only updates carry no price
        let Some(price) = value.get("PRICE").and_then(Value::as_f64) else {
            return Ok(ProviderMessage::Other);
        };
        if !price.is_finite() {
            return Err(Error::Decoding(format!("cryptocompare price for {}", symbol)));
        }

        let change_percent = value
            .get("CHANGEPCT24HOUR")
            .and_then(Value::as_f64)
            .or_else(|| {
                let open = value.get("OPEN24HOUR").and_then(Value::as_f64)?;
                (open > 0.0).then(|| (price - open) / open * 100.0)
            })
            .filter(|c| c.is_finite());

        Ok(ProviderMessage::Price(PriceTick {
            symbol: strip_quote_suffix(&symbol.to_uppercase()).to_string(),
            price,
            change_percent,
        }))
    }
}

impl StreamProvider for CryptoCompareProvider {
    fn kind(&self) -> StreamProviderKind {
        StreamProviderKind::CryptoCompare
    }

    fn subscription_mode(&self) -> SubscriptionMode {
        SubscriptionMode::Message
    }

    fn connect_url(&self, _symbols: &[String]) -> String {
        match &self.api_key {
            Some(key) => format!("{}?api_key={}", self.base_url, key),
            None => self.base_url.clone(),
        }
    }

    fn subscribe_message(&self, symbols: &[String]) -> Option<String> {
        let subs = self.subs(symbols);
        (!subs.is_empty()).then(|| json!({ "action": "SubAdd", "subs": subs }).to_string())
    }

    fn unsubscribe_message(&self, symbols: &[String]) -> Option<String> {
        let subs = self.subs(symbols);
        (!subs.is_empty()).then(|| json!({ "action": "SubRemove", "subs": subs }).to_string())
    }

    fn decode(&self, text: &str) -> Result<ProviderMessage> {
        let value: Value = serde_json::from_str(text)?;

        match Self::message_type(&value) {
            Some(TYPE_AGGREGATE_INDEX) => Self::decode_price(&value),
            Some(TYPE_LOAD_COMPLETE) | Some(TYPE_SUBSCRIBE_COMPLETE) => {
                Ok(ProviderMessage::SubscribeAck)
            }
            Some(TYPE_WELCOME) | Some(TYPE_STREAMER_WELCOME) => Ok(ProviderMessage::Welcome),
            Some(_) => Ok(ProviderMessage::Other),
            None => Err(Error::Decoding("cryptocompare frame without TYPE".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> CryptoCompareProvider {
        CryptoCompareProvider::new("wss://streamer.example.com/v2", Some("k".into()), "usd")
    }

    #[test]
    fn test_subscribe_frames() {
        let p = provider();
        assert_eq!(p.connect_url(&[]), "wss://streamer.example.com/v2?api_key=k");

        let frame: Value =
            serde_json::from_str(&p.subscribe_message(&["btc".into(), "ETH".into()]).unwrap())
                .unwrap();
        assert_eq!(frame["action"], "SubAdd");
        assert_eq!(frame["subs"][0], "5~CCCAGG~BTC~USD");
        assert_eq!(frame["subs"][1], "5~CCCAGG~ETH~USD");

        assert!(p.subscribe_message(&[]).is_none());
        assert!(p.unsubscribe_message(&["BTC".into()]).unwrap().contains("SubRemove"));
    }

    #[test]
    fn test_type_as_string_or_number() {
        let p = provider();
        let text = r#"{"TYPE":"5","MARKET":"CCCAGG","FROMSYMBOL":"BTC","TOSYMBOL":"USD","PRICE":67012.5,"CHANGEPCT24HOUR":1.8}"#;
        assert_eq!(
            p.decode(text).unwrap(),
            ProviderMessage::Price(PriceTick {
                symbol: "BTC".into(),
                price: 67012.5,
                change_percent: Some(1.8),
            })
        );

        let text = r#"{"TYPE":5,"FROMSYMBOL":"ETH","PRICE":110.0,"OPEN24HOUR":100.0}"#;
        match p.decode(text).unwrap() {
            ProviderMessage::Price(tick) => {
                assert_eq!(tick.symbol, "ETH");
                let change = tick.change_percent.unwrap();
                assert!((change - 10.0).abs() < 1e-9);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_control_messages() {
        let p = provider();
        assert_eq!(p.decode(r#"{"TYPE":"3"}"#).unwrap(), ProviderMessage::SubscribeAck);
        assert_eq!(p.decode(r#"{"TYPE":"20","MESSAGE":"STREAMERWELCOME"}"#).unwrap(), ProviderMessage::Welcome);
        assert_eq!(p.decode(r#"{"TYPE":999}"#).unwrap(), ProviderMessage::Welcome);
        assert_eq!(p.decode(r#"{"TYPE":"401"}"#).unwrap(), ProviderMessage::Other);
        assert_eq!(p.decode(r#"{"TYPE":"5","FROMSYMBOL":"BTC","FLAGS":4}"#).unwrap(), ProviderMessage::Other);
        assert!(p.decode(r#"{"MESSAGE":"?"}"#).is_err());
    }
}
