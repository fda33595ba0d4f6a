//! Per-asset detail record from `/coins/{id}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Extended record for a single asset, fetched on demand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinDetail {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    /// Locale code -> description text
    #[serde(default)]
    pub description: HashMap<String, String>,
    #[serde(default)]
    pub image: ImageSet,
    #[serde(default)]
    pub links: Option<CoinLinks>,
    #[serde(default)]
    pub market_data: Option<DetailMarketData>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CoinDetail {
    /// Description for `locale`, falling back to English, skipping empty texts
    pub fn description_for(&self, locale: &str) -> Option<&str> {
        [locale, "en"]
            .iter()
            .filter_map(|l| self.description.get(*l))
            .map(String::as_str)
            .find(|text| !text.trim().is_empty())
    }

    /// Current price in the given reference currency (e.g. "usd")
    pub fn price_in(&self, currency: &str) -> Option<f64> {
        self.market_data
            .as_ref()?
            .current_price
            .get(&currency.to_lowercase())
            .copied()
    }
}

/// Image resolutions offered by the provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageSet {
    #[serde(default)]
    pub thumb: Option<String>,
    #[serde(default)]
    pub small: Option<String>,
    #[serde(default)]
    pub large: Option<String>,
}

impl ImageSet {
    /// Largest available resolution
    pub fn best(&self) -> Option<&str> {
        self.large
            .as_deref()
            .or(self.small.as_deref())
            .or(self.thumb.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoinLinks {
    #[serde(default)]
    pub homepage: Vec<String>,
    #[serde(default)]
    pub subreddit_url: Option<String>,
}

/// Market sub-record: per-currency maps and multi-window percentages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailMarketData {
    #[serde(default, deserialize_with = "deserialize_amounts")]
    pub current_price: HashMap<String, f64>,
    #[serde(default, deserialize_with = "deserialize_amounts")]
    pub market_cap: HashMap<String, f64>,
    #[serde(default, deserialize_with = "deserialize_amounts")]
    pub total_volume: HashMap<String, f64>,
    #[serde(default, deserialize_with = "deserialize_amounts")]
    pub high_24h: HashMap<String, f64>,
    #[serde(default, deserialize_with = "deserialize_amounts")]
    pub low_24h: HashMap<String, f64>,
    #[serde(default, deserialize_with = "deserialize_amounts")]
    pub ath: HashMap<String, f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_7d: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_14d: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_30d: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_60d: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_200d: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_1y: Option<f64>,
    #[serde(default)]
    pub circulating_supply: Option<f64>,
    #[serde(default)]
    pub total_supply: Option<f64>,
    #[serde(default)]
    pub max_supply: Option<f64>,
}

/// Currency maps may contain `null` for unsupported currencies; drop those
fn deserialize_amounts<'de, D>(deserializer: D) -> Result<HashMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<HashMap<String, Option<f64>>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect())
}
