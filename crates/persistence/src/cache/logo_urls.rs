//! Best-known logo URL per symbol, written by background discovery and
//! read synchronously by consumers

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct LogoUrlCache {
    urls: Mutex<HashMap<String, String>>,
}

impl LogoUrlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup by symbol, case-insensitive
    pub fn get(&self, symbol: &str) -> Option<String> {
        self.urls.lock().ok()?.get(&symbol.to_uppercase()).cloned()
    }

    pub fn insert(&self, symbol: &str, url: &str) {
        if let Ok(mut urls) = self.urls.lock() {
            urls.insert(symbol.to_uppercase(), url.to_string());
        }
    }

    /// Merge a discovery batch
    pub fn extend(&self, discovered: HashMap<String, String>) {
        if let Ok(mut urls) = self.urls.lock() {
            for (symbol, url) in discovered {
                urls.insert(symbol.to_uppercase(), url);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.urls.lock().map(|u| u.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut urls) = self.urls.lock() {
            urls.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_lookup_is_case_insensitive() {
        let cache = LogoUrlCache::new();
        cache.insert("btc", "https://logos.example/btc.png");
        assert_eq!(
            cache.get("BTC").as_deref(),
            Some("https://logos.example/btc.png")
        );
        assert!(cache.get("eth").is_none());
    }

    #[test]
    fn test_extend_uppercases_keys() {
        let cache = LogoUrlCache::new();
        let mut batch = HashMap::new();
        batch.insert("eth".to_string(), "https://a/eth.png".to_string());
        cache.extend(batch);
        assert_eq!(cache.get("Eth").as_deref(), Some("https://a/eth.png"));
        assert_eq!(cache.len(), 1);
    }
}
