//! Fast quotes from the bulk 24h ticker endpoint

use async_trait::async_trait;
use chrono::Utc;
use coinfeed_core::traits::QuoteSource;
use coinfeed_core::{Coin, Error, MarketDataConfig, Quote, Result, TickerRecord};
use futures_util::future::join_all;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

/// Client for the low-latency quote provider
pub struct QuoteClient {
    http: Client,
    base_url: String,
    quote_currencies: Vec<String>,
    config: MarketDataConfig,
}

impl QuoteClient {
    pub fn new(config: &MarketDataConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("coinfeed/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::InvalidRequest(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.quote_base_url.trim_end_matches('/').to_string(),
            quote_currencies: config
                .quote_currencies
                .iter()
                .map(|q| q.to_uppercase())
                .collect(),
            config: config.clone(),
        })
    }

    /// Fetch every recognized quote, keyed by uppercased base symbol.
    ///
    /// Records with an unknown reference currency or unparseable numbers
    /// are skipped. When a base appears more than once, the first record
    /// wins.
    #[instrument(skip(self))]
    pub async fn fetch_quotes(&self) -> Result<HashMap<String, Quote>> {
        let url = format!("{}/ticker/24hr", self.base_url);
        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited { retry_after_secs: None });
        }
        if !status.is_success() {
            return Err(Error::Transport(format!("HTTP {}", status)));
        }

        let body = response.bytes().await?;
        let raw: Vec<serde_json::Value> = serde_json::from_slice(&body)?;

        let mut quotes = HashMap::new();
        for value in raw {
            let Ok(record) = serde_json::from_value::<TickerRecord>(value) else {
                continue;
            };
            if let Some((base, quote)) = record.to_quote(&self.quote_currencies) {
                quotes.entry(base).or_insert(quote);
            }
        }

        debug!("Fetched {} fast quotes", quotes.len());
        Ok(quotes)
    }

    /// Overwrite price and change of every coin that has a quote.
    ///
    /// Never fails: on any error the input comes back unchanged.
    pub async fn update_coins(&self, coins: Vec<Coin>) -> Vec<Coin> {
        let quotes = match self.fetch_quotes().await {
            Ok(quotes) => quotes,
            Err(e) => {
                warn!("Fast quote pass skipped: {}", e);
                return coins;
            }
        };

        let now = Utc::now();
        let mut updated = 0usize;
        let coins = coins
            .into_iter()
            .map(|mut coin| {
                if let Some(quote) = quotes.get(&coin.symbol.to_uppercase()) {
                    coin.apply_quote(quote, now);
                    updated += 1;
                }
                coin
            })
            .collect();

        debug!("Fast quotes applied to {} coins", updated);
        coins
    }

    /// Probe the logo templates for every symbol concurrently.
    ///
    /// Within one symbol the candidates are tried in template order and the
    /// first non-empty 200 response wins. Symbols with no hit are absent
    /// from the result.
    #[instrument(skip_all, fields(count = symbols.len()))]
    pub async fn discover_best_logo_urls(&self, symbols: &[String]) -> HashMap<String, String> {
        let probes = symbols.iter().map(|symbol| self.probe_logo(symbol));
        let found: HashMap<String, String> = join_all(probes).await.into_iter().flatten().collect();

        debug!("Logo probe resolved {}/{} symbols", found.len(), symbols.len());
        found
    }

    async fn probe_logo(&self, symbol: &str) -> Option<(String, String)> {
        if symbol.trim().is_empty() {
            return None;
        }

        for candidate in self.config.logo_candidates(symbol) {
            match self.http.get(&candidate).send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    match response.bytes().await {
                        Ok(bytes) if !bytes.is_empty() => {
                            return Some((symbol.to_uppercase(), candidate));
                        }
                        _ => continue,
                    }
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!("Logo probe {} failed: {}", candidate, e);
                    continue;
                }
            }
        }

        None
    }
}

#[async_trait]
impl QuoteSource for QuoteClient {
    async fn update_coins(&self, coins: Vec<Coin>) -> Vec<Coin> {
        QuoteClient::update_coins(self, coins).await
    }

    async fn discover_best_logo_urls(&self, symbols: &[String]) -> HashMap<String, String> {
        QuoteClient::discover_best_logo_urls(self, symbols).await
    }
}
