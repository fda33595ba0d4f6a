//! Two-tier image cache with download de-duplication
//!
//! Lookup order: memory, disk, network. A network miss walks the ordered
//! fallback templates for the symbol hint and ends with a generated
//! placeholder, so a load always yields an image. Concurrent requests for
//! the same key supersede each other: the newest request cancels the
//! stale download and every waiter receives the newest result.

mod placeholder;

pub use placeholder::{color_for_symbol, placeholder_svg};

use async_trait::async_trait;
use coinfeed_core::traits::ImageStore;
use coinfeed_core::{Error, ImageOrigin, LoadedImage, MarketDataConfig, Result};
use coinfeed_persistence::{DiskImageCache, MemoryImageCache};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

type ResultSlot = Arc<watch::Sender<Option<LoadedImage>>>;

/// A download currently running for a key
struct InFlight {
    id: u64,
    cancel: CancellationToken,
    result: ResultSlot,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    downloads_started: AtomicU64,
    downloads_completed: AtomicU64,
    downloads_superseded: AtomicU64,
    placeholders: AtomicU64,
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageCacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub downloads_started: u64,
    pub downloads_completed: u64,
    pub downloads_superseded: u64,
    pub placeholders: u64,
    pub memory_entries: usize,
    pub memory_bytes: usize,
}

pub struct ImageCache {
    http: Client,
    memory: MemoryImageCache,
    disk: Option<DiskImageCache>,
    config: MarketDataConfig,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_id: AtomicU64,
    counters: Counters,
}

/// Drops the registry entry when a download ends or its caller goes away
struct Registration<'a> {
    cache: &'a ImageCache,
    key: &'a str,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.cache.unregister(self.key, self.id);
    }
}

impl ImageCache {
    pub fn new(config: &MarketDataConfig, disk: Option<DiskImageCache>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("coinfeed/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::InvalidRequest(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            memory: MemoryImageCache::new(
                config.image_memory_max_entries,
                config.image_memory_max_bytes,
            ),
            disk,
            config: config.clone(),
            in_flight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            counters: Counters::default(),
        })
    }

    /// Cache key: the URL, or the symbol when there is no URL
    fn cache_key(url: &str, symbol_hint: &str) -> String {
        let url = url.trim();
        if url.is_empty() {
            format!("symbol:{}", symbol_hint.trim().to_uppercase())
        } else {
            url.to_string()
        }
    }

    /// Load an image; never fails
    #[instrument(skip(self))]
    pub async fn load(&self, url: &str, symbol_hint: &str) -> LoadedImage {
        let key = Self::cache_key(url, symbol_hint);

        if let Some(bytes) = self.memory.get(&key) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return LoadedImage::new(bytes, ImageOrigin::Memory);
        }

        if let Some(ref disk) = self.disk {
            if let Some(bytes) = disk.read(&key).await {
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                let bytes: Arc<[u8]> = bytes.into();
                self.memory.insert(&key, bytes.clone());
                return LoadedImage::new(bytes, ImageOrigin::Disk);
            }
        }

        self.download_latest(&key, url.trim(), symbol_hint).await
    }

    /// Memory-tier probe without any I/O, keyed like `load`
    pub fn cached(&self, url: &str, symbol_hint: &str) -> Option<LoadedImage> {
        self.memory
            .get(&Self::cache_key(url, symbol_hint))
            .map(|bytes| LoadedImage::new(bytes, ImageOrigin::Memory))
    }

    /// Drop the memory tier
    pub fn clear_memory(&self) {
        let dropped = self.memory.len();
        self.memory.clear();
        debug!("Image memory tier cleared ({} entries)", dropped);
    }

    /// Clear both tiers. Memory is empty on return; the disk tier is wiped
    /// in the background and the returned handle resolves when it is done.
    pub fn clear(&self) -> Option<JoinHandle<()>> {
        self.clear_memory();
        let disk = self.disk.clone()?;
        Some(tokio::spawn(async move {
            if let Err(e) = disk.clear().await {
                warn!("Failed to clear image disk cache: {}", e);
            }
        }))
    }

    pub fn stats(&self) -> ImageCacheStats {
        ImageCacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            downloads_started: self.counters.downloads_started.load(Ordering::Relaxed),
            downloads_completed: self.counters.downloads_completed.load(Ordering::Relaxed),
            downloads_superseded: self.counters.downloads_superseded.load(Ordering::Relaxed),
            placeholders: self.counters.placeholders.load(Ordering::Relaxed),
            memory_entries: self.memory.len(),
            memory_bytes: self.memory.total_bytes(),
        }
    }

    /// Register as the newest request for `key`, cancelling a stale one
    fn register(&self, key: &str) -> (u64, CancellationToken, ResultSlot) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = match in_flight.remove(key) {
            Some(stale) => {
                debug!("Superseding download {} for {}", stale.id, key);
                stale.cancel.cancel();
                self.counters
                    .downloads_superseded
                    .fetch_add(1, Ordering::Relaxed);
                stale.result
            }
            None => Arc::new(watch::channel(None).0),
        };

        in_flight.insert(
            key.to_string(),
            InFlight {
                id,
                cancel: cancel.clone(),
                result: result.clone(),
            },
        );
        (id, cancel, result)
    }

    /// Remove our registry entry unless a newer request replaced it
    fn unregister(&self, key: &str, id: u64) {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if in_flight.get(key).map(|f| f.id) == Some(id) {
            in_flight.remove(key);
        }
    }

    async fn download_latest(&self, key: &str, url: &str, symbol_hint: &str) -> LoadedImage {
        loop {
            let (id, cancel, result) = self.register(key);
            let _registration = Registration { cache: self, key, id };
            let mut result_rx = result.subscribe();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Download for {} superseded, awaiting newer result", key);
                    // Only registry entries may keep the slot open
                    drop(result);
                    if let Some(image) = Self::await_newer(&mut result_rx).await {
                        return image;
                    }
                    if let Some(bytes) = self.memory.get(key) {
                        return LoadedImage::new(bytes, ImageOrigin::Memory);
                    }
                    debug!("Newer download for {} was abandoned, fetching again", key);
                }
                fetched = self.fetch_from_sources(url, symbol_hint) => {
                    let image = match fetched {
                        Some((bytes, origin)) => {
                            self.counters.downloads_completed.fetch_add(1, Ordering::Relaxed);
                            self.store(key, bytes, origin)
                        }
                        None => self.placeholder(symbol_hint),
                    };
                    // Entry goes before the result is published
                    self.unregister(key, id);
                    result.send_replace(Some(image.clone()));
                    return image;
                }
            }
        }
    }

    /// Wait for the newest request to publish. `None` when every sender
    /// went away without a result.
    async fn await_newer(
        result_rx: &mut watch::Receiver<Option<LoadedImage>>,
    ) -> Option<LoadedImage> {
        loop {
            let current = result_rx.borrow_and_update().clone();
            if current.is_some() {
                return current;
            }
            if result_rx.changed().await.is_err() {
                return result_rx.borrow().clone();
            }
        }
    }

    fn store(&self, key: &str, bytes: Vec<u8>, origin: ImageOrigin) -> LoadedImage {
        let bytes: Arc<[u8]> = bytes.into();
        self.memory.insert(key, bytes.clone());

        if let Some(disk) = self.disk.clone() {
            let key = key.to_string();
            let payload = bytes.clone();
            tokio::spawn(async move {
                if let Err(e) = disk.write(&key, &payload).await {
                    warn!("Failed to persist image {}: {}", key, e);
                }
            });
        }

        LoadedImage::new(bytes, origin)
    }

    fn placeholder(&self, symbol_hint: &str) -> LoadedImage {
        self.counters.placeholders.fetch_add(1, Ordering::Relaxed);
        LoadedImage::new(placeholder_svg(symbol_hint), ImageOrigin::Placeholder)
    }

    /// Primary URL first, then each fallback template in order
    async fn fetch_from_sources(&self, url: &str, symbol_hint: &str) -> Option<(Vec<u8>, ImageOrigin)> {
        if !url.is_empty() {
            match self.download(url).await {
                Ok(bytes) => return Some((bytes, ImageOrigin::Network)),
                Err(e) => debug!("Primary image {} failed: {}", url, e),
            }
        }

        if symbol_hint.trim().is_empty() {
            return None;
        }

        for (index, candidate) in self.config.logo_candidates(symbol_hint.trim()).iter().enumerate() {
            if candidate == url {
                continue;
            }
            match self.download(candidate).await {
                Ok(bytes) => return Some((bytes, ImageOrigin::Fallback(index))),
                Err(e) => debug!("Fallback image {} failed: {}", candidate, e),
            }
        }

        None
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.counters.downloads_started.fetch_add(1, Ordering::Relaxed);
        let response = self.http.get(url).send().await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(Error::NotFound(url.to_string())),
            status => return Err(Error::Transport(format!("HTTP {}", status))),
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::NotFound(format!("{} (empty body)", url)));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageStore for ImageCache {
    async fn load(&self, url: &str, symbol_hint: &str) -> LoadedImage {
        ImageCache::load(self, url, symbol_hint).await
    }

    fn clear_memory(&self) {
        ImageCache::clear_memory(self)
    }
}
