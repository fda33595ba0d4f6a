//! Abbreviated quotes from the secondary REST provider

use serde::{Deserialize, Serialize};

/// Price and percent change for one base symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub change_percent: f64,
}

/// One record of the bulk 24h ticker array. Numbers arrive as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerRecord {
    pub symbol: String,
    #[serde(default)]
    pub last_price: Option<String>,
    #[serde(default)]
    pub price_change_percent: Option<String>,
}

impl TickerRecord {
    /// Base symbol and quote, if this record is quoted against one of
    /// `quote_currencies` and both numbers parse
    pub fn to_quote(&self, quote_currencies: &[String]) -> Option<(String, Quote)> {
        let ticker = self.symbol.to_uppercase();
        let base = quote_currencies
            .iter()
            .find_map(|q| ticker.strip_suffix(q.to_uppercase().as_str()))
            .filter(|base| !base.is_empty())?;

        let price = self.last_price.as_deref()?.trim().parse::<f64>().ok()?;
        let change_percent = self
            .price_change_percent
            .as_deref()?
            .trim()
            .parse::<f64>()
            .ok()?;
        if !price.is_finite() || !change_percent.is_finite() {
            return None;
        }

        Some((base.to_string(), Quote { price, change_percent }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdt() -> Vec<String> {
        vec!["USDT".to_string()]
    }

    fn record(symbol: &str, price: &str, change: &str) -> TickerRecord {
        TickerRecord {
            symbol: symbol.to_string(),
            last_price: Some(price.to_string()),
            price_change_percent: Some(change.to_string()),
        }
    }

    #[test]
    fn test_quote_from_usdt_pair() {
        let (base, quote) = record("ETHUSDT", "3200.10", "-1.25").to_quote(&usdt()).unwrap();
        assert_eq!(base, "ETH");
        assert_eq!(quote.price, 3200.10);
        assert_eq!(quote.change_percent, -1.25);
    }

    #[test]
    fn test_unrecognized_reference_currency_skipped() {
        assert!(record("ETHBTC", "0.05", "1.0").to_quote(&usdt()).is_none());
        assert!(record("USDT", "1.0", "0.0").to_quote(&usdt()).is_none());
    }

    #[test]
    fn test_unparseable_numbers_skipped() {
        assert!(record("BTCUSDT", "abc", "1.0").to_quote(&usdt()).is_none());
        assert!(record("BTCUSDT", "1.0", "").to_quote(&usdt()).is_none());
    }
}
