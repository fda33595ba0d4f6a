//! Coin-related models

use crate::models::Quote;
use crate::types::{PriceChangeWindow, SymbolMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Authoritative market record for one asset.
///
/// Equality and hashing use the identifier only. The identifier is fixed at
/// construction; streaming updates only ever touch price, percentage and
/// `last_updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coin {
    id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    pub current_price: f64,
    pub price_change_percentage: f64,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub high_24h: Option<f64>,
    #[serde(default)]
    pub low_24h: Option<f64>,
    #[serde(default)]
    pub circulating_supply: Option<f64>,
    #[serde(default)]
    pub total_supply: Option<f64>,
    #[serde(default)]
    pub max_supply: Option<f64>,
    #[serde(default)]
    pub ath: Option<f64>,
    #[serde(default)]
    pub ath_change_percentage: Option<f64>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Coin {
    pub fn new(id: &str, symbol: &str, name: &str, current_price: f64) -> Self {
        Self {
            id: id.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
            image: None,
            current_price,
            price_change_percentage: 0.0,
            market_cap: None,
            market_cap_rank: None,
            total_volume: None,
            high_24h: None,
            low_24h: None,
            circulating_supply: None,
            total_supply: None,
            max_supply: None,
            ath: None,
            ath_change_percentage: None,
            last_updated: None,
        }
    }

    /// Lightweight record for a coin seen only through the price stream.
    ///
    /// The id is resolved through the symbol table when possible, otherwise
    /// the lowercased ticker stands in for it.
    pub fn from_tick(symbol: &str, price: f64, change_percent: Option<f64>) -> Self {
        let id = SymbolMap::id_for(symbol)
            .map(str::to_string)
            .unwrap_or_else(|| symbol.to_lowercase());
        let mut coin = Self::new(&id, &symbol.to_lowercase(), &symbol.to_uppercase(), price);
        coin.price_change_percentage = change_percent.unwrap_or(0.0);
        coin.last_updated = Some(Utc::now());
        coin
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Case-insensitive symbol comparison
    pub fn matches_symbol(&self, symbol: &str) -> bool {
        self.symbol.eq_ignore_ascii_case(symbol)
    }

    /// Apply a streaming tick. A missing percentage leaves the old one in place.
    pub fn apply_tick(&mut self, price: f64, change_percent: Option<f64>, at: DateTime<Utc>) {
        self.current_price = price;
        if let Some(change) = change_percent {
            self.price_change_percentage = change;
        }
        self.last_updated = Some(at);
    }

    /// Overwrite price data from a fast quote
    pub fn apply_quote(&mut self, quote: &Quote, at: DateTime<Utc>) {
        self.current_price = quote.price;
        self.price_change_percentage = quote.change_percent;
        self.last_updated = Some(at);
    }

    /// Keep `previous`'s price fields when they are strictly fresher than ours.
    ///
    /// Used when a snapshot replaces the table: a tick that landed after the
    /// provider stamped its record must not be rolled back.
    pub fn keep_fresher_price(&mut self, previous: &Coin) {
        let fresher = match (previous.last_updated, self.last_updated) {
            (Some(prev), Some(ours)) => prev > ours,
            (Some(_), None) => true,
            _ => false,
        };
        if fresher {
            self.current_price = previous.current_price;
            self.price_change_percentage = previous.price_change_percentage;
            self.last_updated = previous.last_updated;
        }
    }
}

impl PartialEq for Coin {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Coin {}

impl Hash for Coin {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Raw entry of the paginated `/coins/markets` listing
#[derive(Debug, Clone, Deserialize)]
pub struct MarketCoinRecord {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub high_24h: Option<f64>,
    #[serde(default)]
    pub low_24h: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub circulating_supply: Option<f64>,
    #[serde(default)]
    pub total_supply: Option<f64>,
    #[serde(default)]
    pub max_supply: Option<f64>,
    #[serde(default)]
    pub ath: Option<f64>,
    #[serde(default)]
    pub ath_change_percentage: Option<f64>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Window-specific fields such as `price_change_percentage_7d_in_currency`
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl MarketCoinRecord {
    /// Convert into a `Coin`, reading the percentage for `window`.
    ///
    /// Falls back to the plain 24h percentage when the window field is absent.
    pub fn into_coin(self, window: PriceChangeWindow) -> Coin {
        let change = self
            .extra
            .get(&window.response_field())
            .and_then(|v| v.as_f64())
            .or(self.price_change_percentage_24h)
            .unwrap_or(0.0);

        Coin {
            id: self.id,
            symbol: self.symbol,
            name: self.name,
            image: self.image,
            current_price: self.current_price.unwrap_or(0.0),
            price_change_percentage: change,
            market_cap: self.market_cap,
            market_cap_rank: self.market_cap_rank,
            total_volume: self.total_volume,
            high_24h: self.high_24h,
            low_24h: self.low_24h,
            circulating_supply: self.circulating_supply,
            total_supply: self.total_supply,
            max_supply: self.max_supply,
            ath: self.ath,
            ath_change_percentage: self.ath_change_percentage,
            last_updated: self.last_updated,
        }
    }
}
