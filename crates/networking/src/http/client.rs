//! Market snapshot HTTP client with cache-backed degraded mode

use async_trait::async_trait;
use coinfeed_core::traits::SnapshotSource;
use coinfeed_core::{
    Coin, CoinDetail, Error, MarketCoinRecord, MarketDataConfig, MarketQuery, Result,
};
use coinfeed_persistence::sqlite::{self, Database};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER},
    Client, StatusCode, Url,
};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

const USER_AGENT_VALUE: &str = concat!("coinfeed/", env!("CARGO_PKG_VERSION"));

/// Upper bound on a provider-requested cool-down
const MAX_RETRY_AFTER_SECS: u64 = 300;

/// HTTP client for the primary market-data provider.
///
/// Every successful response body is written to the response cache keyed
/// by its full request URL. On transport failures, 5xx answers and rate
/// limiting, the last cached body for the identical request is served
/// instead. Decoding failures are never retried from cache.
pub struct MarketClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    /// Optional response cache (shared app database)
    cache: Option<Database>,
    /// While set and in the future, requests skip the network
    rate_limited_until: Mutex<Option<Instant>>,
}

impl MarketClient {
    /// Create a new client from the market-data config
    pub fn new(config: &MarketDataConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT_VALUE)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::InvalidRequest(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.rest_base_url.trim_end_matches('/').to_string(),
            api_key: config.rest_api_key.clone(),
            cache: None,
            rate_limited_until: Mutex::new(None),
        })
    }

    /// Create a new client backed by a response cache
    pub fn new_with_cache(config: &MarketDataConfig, cache: Database) -> Result<Self> {
        let mut client = Self::new(config)?;
        client.cache = Some(cache);
        Ok(client)
    }

    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(key) {
                headers.insert("x-cg-demo-api-key", value);
            }
        }

        headers
    }

    /// Full request URL for a snapshot page; doubles as the cache key
    pub(crate) fn snapshot_url(&self, query: &MarketQuery) -> Result<Url> {
        if query.page_size == 0 || query.page == 0 {
            return Err(Error::InvalidRequest(
                "page and page size must be positive".to_string(),
            ));
        }

        Url::parse_with_params(
            &format!("{}/coins/markets", self.base_url),
            &[
                ("vs_currency", query.vs_currency.to_lowercase()),
                ("order", "market_cap_desc".to_string()),
                ("per_page", query.page_size.to_string()),
                ("page", query.page.to_string()),
                ("sparkline", "false".to_string()),
                ("price_change_percentage", query.window.as_param().to_string()),
            ],
        )
        .map_err(|e| Error::InvalidRequest(e.to_string()))
    }

    pub(crate) fn detail_url(&self, id: &str) -> Result<Url> {
        if id.trim().is_empty() || id.contains('/') {
            return Err(Error::InvalidRequest(format!("invalid coin id: {:?}", id)));
        }

        Url::parse_with_params(
            &format!("{}/coins/{}", self.base_url, id),
            &[
                ("localization", "true"),
                ("tickers", "false"),
                ("market_data", "true"),
                ("community_data", "false"),
                ("developer_data", "false"),
                ("sparkline", "false"),
            ],
        )
        .map_err(|e| Error::InvalidRequest(e.to_string()))
    }

    /// Fetch one page of the market listing (market-cap descending)
    #[instrument(skip(self))]
    pub async fn fetch_market_snapshot(&self, query: &MarketQuery) -> Result<Vec<Coin>> {
        let url = self.snapshot_url(query)?;
        let body = self.get_with_fallback(&url).await?;

        let records: Vec<MarketCoinRecord> = serde_json::from_slice(&body).map_err(|e| {
            error!("Failed to parse market snapshot: {}", e);
            Error::Decoding(e.to_string())
        })?;

        let coins: Vec<Coin> = records
            .into_iter()
            .map(|r| r.into_coin(query.window))
            .collect();

        debug!("Market snapshot page {}: {} coins", query.page, coins.len());
        Ok(coins)
    }

    /// Fetch the detail record for one asset
    #[instrument(skip(self))]
    pub async fn fetch_detail(&self, id: &str) -> Result<CoinDetail> {
        let url = self.detail_url(id)?;
        let body = self.get_with_fallback(&url).await.map_err(|e| match e {
            Error::NotFound(_) => Error::NotFound(id.to_string()),
            other => other,
        })?;

        let detail: CoinDetail = serde_json::from_slice(&body).map_err(|e| {
            error!("Failed to parse detail for {}: {}", id, e);
            Error::Decoding(e.to_string())
        })?;

        debug!("Detail fetched for {}", detail.id);
        Ok(detail)
    }

    /// GET with degraded-mode fallback to the response cache
    async fn get_with_fallback(&self, url: &Url) -> Result<Vec<u8>> {
        let key = url.as_str();

        if let Some(remaining) = self.rate_limit_remaining() {
            debug!("Rate limit cool-down active ({:?} left), skipping network", remaining);
            let err = Error::RateLimited {
                retry_after_secs: Some(remaining.as_secs().max(1)),
            };
            return self.serve_cached(key, err).await;
        }

        match self.send(url).await {
            Ok(body) => {
                self.store(key, &body).await;
                Ok(body)
            }
            Err(e) if e.is_transport() => self.serve_cached(key, e).await,
            Err(e) => Err(e),
        }
    }

    async fn send(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url.clone())
            .headers(self.default_headers())
            .send()
            .await?;

        let status = response.status();
        debug!("GET {} -> {}", url.path(), status);

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs.min(MAX_RETRY_AFTER_SECS));
            self.note_rate_limit(retry_after_secs);
            warn!("Rate limited on {} (retry after {:?}s)", url.path(), retry_after_secs);
            return Err(Error::RateLimited { retry_after_secs });
        }

        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(url.path().to_string()));
        }

        if status.is_server_error() {
            return Err(Error::Transport(format!("HTTP {}", status)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Request failed: HTTP {} - {}", status, body);
            return Err(Error::InvalidRequest(format!("HTTP {}: {}", status, body)));
        }

        let body = response.bytes().await?;
        Ok(body.to_vec())
    }

    async fn store(&self, key: &str, body: &[u8]) {
        if let Some(ref db) = self.cache {
            if let Err(e) = sqlite::store_response(db.pool(), key, 200, body).await {
                warn!("Failed to cache response for {}: {}", key, e);
            }
        }
    }

    /// Serve the last cached body for `key`, or surface `err`
    async fn serve_cached(&self, key: &str, err: Error) -> Result<Vec<u8>> {
        let Some(ref db) = self.cache else {
            return Err(err);
        };

        match sqlite::get_response(db.pool(), key).await {
            Ok(Some(cached)) => {
                info!(
                    "Serving cached response ({}s old) after: {}",
                    cached.age().num_seconds(),
                    err
                );
                Ok(cached.body)
            }
            Ok(None) => {
                warn!("No cached response to fall back on: {}", err);
                Err(err)
            }
            Err(db_err) => {
                warn!("Response cache lookup failed: {}", db_err);
                Err(err)
            }
        }
    }

    fn note_rate_limit(&self, retry_after_secs: Option<u64>) {
        if let Some(secs) = retry_after_secs.filter(|s| *s > 0) {
            if let Ok(mut until) = self.rate_limited_until.lock() {
                *until = Some(Instant::now() + Duration::from_secs(secs));
            }
        }
    }

    fn rate_limit_remaining(&self) -> Option<Duration> {
        let mut until = self.rate_limited_until.lock().ok()?;
        match *until {
            Some(deadline) => {
                let now = Instant::now();
                if deadline > now {
                    Some(deadline - now)
                } else {
                    *until = None;
                    None
                }
            }
            None => None,
        }
    }

    /// Get a reference to the response cache (if one is attached)
    pub fn cache(&self) -> Option<&Database> {
        self.cache.as_ref()
    }
}

#[async_trait]
impl SnapshotSource for MarketClient {
    async fn fetch_market_snapshot(&self, query: &MarketQuery) -> Result<Vec<Coin>> {
        MarketClient::fetch_market_snapshot(self, query).await
    }

    async fn fetch_detail(&self, id: &str) -> Result<CoinDetail> {
        MarketClient::fetch_detail(self, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinfeed_core::PriceChangeWindow;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn market_body() -> serde_json::Value {
        json!([
            {
                "id": "bitcoin", "symbol": "btc", "name": "Bitcoin",
                "image": "https://example.com/btc.png",
                "current_price": 67012.0, "market_cap": 1320000000000u64,
                "market_cap_rank": 1, "price_change_percentage_24h": 1.8,
                "price_change_percentage_24h_in_currency": 1.81
            },
            {
                "id": "ethereum", "symbol": "eth", "name": "Ethereum",
                "current_price": 3200.1, "price_change_percentage_24h": -1.25
            }
        ])
    }

    fn config_for(uri: &str) -> MarketDataConfig {
        MarketDataConfig {
            rest_base_url: uri.to_string(),
            request_timeout_secs: 1,
            ..Default::default()
        }
    }

    fn query() -> MarketQuery {
        MarketQuery::first_page("usd", PriceChangeWindow::Day, 2)
    }

    async fn cached_client(uri: &str) -> MarketClient {
        let db = Database::connect_in_memory().await.unwrap();
        MarketClient::new_with_cache(&config_for(uri), db).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_request_and_decode() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .and(query_param("vs_currency", "usd"))
            .and(query_param("order", "market_cap_desc"))
            .and(query_param("per_page", "2"))
            .and(query_param("page", "1"))
            .and(query_param("price_change_percentage", "24h"))
            .respond_with(ResponseTemplate::new(200).set_body_json(market_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = MarketClient::new(&config_for(&server.uri())).unwrap();
        let coins = client.fetch_market_snapshot(&query()).await.unwrap();

        assert_eq!(coins.len(), 2);
        assert_eq!(coins[0].id(), "bitcoin");
        assert_eq!(coins[0].price_change_percentage, 1.81);
        assert_eq!(coins[1].price_change_percentage, -1.25);
    }

    #[tokio::test]
    async fn test_rate_limited_serves_cached_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(market_body()))
            .mount(&server)
            .await;

        let client = cached_client(&server.uri()).await;
        let fresh = client.fetch_market_snapshot(&query()).await.unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let degraded = client.fetch_market_snapshot(&query()).await.unwrap();
        assert_eq!(degraded, fresh);
    }

    #[tokio::test]
    async fn test_rate_limited_without_cache_surfaces_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let client = cached_client(&server.uri()).await;
        let err = client.fetch_market_snapshot(&query()).await.unwrap_err();
        assert_eq!(err, Error::RateLimited { retry_after_secs: Some(30) });
    }

    #[tokio::test]
    async fn test_retry_after_skips_network_during_cooldown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "60"))
            .expect(1)
            .mount(&server)
            .await;

        let client = MarketClient::new(&config_for(&server.uri())).unwrap();
        assert!(client.fetch_market_snapshot(&query()).await.unwrap_err().is_rate_limited());
        assert!(client.fetch_market_snapshot(&query()).await.unwrap_err().is_rate_limited());
    }

    #[tokio::test]
    async fn test_server_error_falls_back_to_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(market_body()))
            .mount(&server)
            .await;

        let client = cached_client(&server.uri()).await;
        client.fetch_market_snapshot(&query()).await.unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let coins = client.fetch_market_snapshot(&query()).await.unwrap();
        assert_eq!(coins.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_host_serves_identical_request_from_cache() {
        let db = Database::connect_in_memory().await.unwrap();
        // Nothing listens on port 9 of the loopback interface
        let client = MarketClient::new_with_cache(&config_for("http://127.0.0.1:9"), db).unwrap();

        let key = client.snapshot_url(&query()).unwrap();
        let body = serde_json::to_vec(&market_body()).unwrap();
        sqlite::store_response(client.cache().unwrap().pool(), key.as_str(), 200, &body)
            .await
            .unwrap();

        let coins = client.fetch_market_snapshot(&query()).await.unwrap();
        assert_eq!(coins.len(), 2);

        let other_page = MarketQuery { page: 2, ..query() };
        let err = client.fetch_market_snapshot(&other_page).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(market_body())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = MarketClient::new(&config_for(&server.uri())).unwrap();
        let err = client.fetch_market_snapshot(&query()).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_decoding_error_is_not_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(market_body()))
            .mount(&server)
            .await;

        let client = cached_client(&server.uri()).await;
        client.fetch_market_snapshot(&query()).await.unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"maintenance"}"#))
            .mount(&server)
            .await;

        let err = client.fetch_market_snapshot(&query()).await.unwrap_err();
        assert!(matches!(err, Error::Decoding(_)));
    }

    #[tokio::test]
    async fn test_detail_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/no-such-coin"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = cached_client(&server.uri()).await;
        let err = client.fetch_detail("no-such-coin").await.unwrap_err();
        assert_eq!(err, Error::NotFound("no-such-coin".to_string()));
    }

    #[tokio::test]
    async fn test_detail_fetch_and_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/ethereum"))
            .and(query_param("market_data", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ethereum", "symbol": "eth", "name": "Ethereum",
                "description": { "en": "Smart contracts." },
                "image": { "large": "https://example.com/eth.png" },
                "market_data": { "current_price": { "usd": 3200.1 } }
            })))
            .mount(&server)
            .await;

        let client = cached_client(&server.uri()).await;
        let detail = client.fetch_detail("ethereum").await.unwrap();
        assert_eq!(detail.price_in("usd"), Some(3200.1));

        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let cached = client.fetch_detail("ethereum").await.unwrap();
        assert_eq!(cached.description_for("en"), Some("Smart contracts."));
    }

    #[tokio::test]
    async fn test_invalid_ids_rejected_before_network() {
        let client = MarketClient::new(&config_for("http://127.0.0.1:9")).unwrap();
        assert!(matches!(
            client.fetch_detail("").await.unwrap_err(),
            Error::InvalidRequest(_)
        ));
        assert!(matches!(
            client.fetch_detail("a/b").await.unwrap_err(),
            Error::InvalidRequest(_)
        ));
    }
}
