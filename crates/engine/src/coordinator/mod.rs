//! Market data coordinator
//!
//! Owns the authoritative coin table. REST snapshots replace it, stream
//! ticks patch it, and every change is pushed to subscribers as a
//! [`MarketEvent`]. A backup timer refetches the snapshot whenever the
//! stream is down or the data is more than two intervals old.

mod events;
mod policy;

#[cfg(test)]
mod tests;

pub use events::MarketEvent;
pub use policy::should_refresh;

use chrono::Utc;
use coinfeed_core::traits::{ImageStore, PriceStream, QuoteSource, SnapshotSource};
use coinfeed_core::{
    Coin, CoinDetail, LoadedImage, MarketDataConfig, Result, StreamEvent, SymbolMap,
};
use coinfeed_persistence::LogoUrlCache;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Concurrent logo downloads during prefetch
const LOGO_PREFETCH_CONCURRENCY: usize = 8;

/// Services the coordinator drives
#[derive(Clone)]
pub struct MarketServices {
    pub snapshots: Arc<dyn SnapshotSource>,
    pub quotes: Arc<dyn QuoteSource>,
    pub stream: Arc<dyn PriceStream>,
    pub images: Arc<dyn ImageStore>,
}

struct Inner {
    services: MarketServices,
    config: MarketDataConfig,
    coins: RwLock<Vec<Coin>>,
    logo_urls: LogoUrlCache,
    /// Last successful snapshot fetch
    last_fetch: Mutex<Option<Instant>>,
    snapshot_loaded: AtomicBool,
    stream_connected: AtomicBool,
    events: broadcast::Sender<MarketEvent>,
    /// Held by the pump task for as long as it runs
    stream_events: tokio::sync::Mutex<mpsc::UnboundedReceiver<StreamEvent>>,
    running: Mutex<Option<CancellationToken>>,
}

/// Single source of current coin state. Cheap to clone.
#[derive(Clone)]
pub struct MarketDataCoordinator {
    inner: Arc<Inner>,
}

impl MarketDataCoordinator {
    pub fn new(
        config: MarketDataConfig,
        services: MarketServices,
        stream_events: mpsc::UnboundedReceiver<StreamEvent>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            inner: Arc::new(Inner {
                services,
                config,
                coins: RwLock::new(Vec::new()),
                logo_urls: LogoUrlCache::new(),
                last_fetch: Mutex::new(None),
                snapshot_loaded: AtomicBool::new(false),
                stream_connected: AtomicBool::new(false),
                events,
                stream_events: tokio::sync::Mutex::new(stream_events),
                running: Mutex::new(None),
            }),
        }
    }

    /// Open the stream, fetch the first snapshot and arm the backup timer.
    /// No-op when already started. Must be called within a Tokio runtime.
    pub fn start(&self) {
        let Ok(mut running) = self.inner.running.lock() else {
            return;
        };
        if running.is_some() {
            debug!("Coordinator already started");
            return;
        }

        let cancel = CancellationToken::new();
        *running = Some(cancel.clone());
        drop(running);

        info!(
            "Starting market data coordinator (backup every {:?})",
            self.inner.config.backup_interval()
        );

        tokio::spawn(self.inner.clone().run_stream_pump(cancel.clone()));
        self.inner.services.stream.connect();

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _ = inner.refresh_snapshot().await;
        });

        tokio::spawn(self.inner.clone().run_backup_timer(cancel));
    }

    /// Close the stream and cancel the timer. Safe to call repeatedly.
    pub fn stop(&self) {
        let token = self.inner.running.lock().ok().and_then(|mut r| r.take());
        let Some(token) = token else {
            return;
        };

        token.cancel();
        self.inner.services.stream.disconnect();
        info!("Market data coordinator stopped");
    }

    pub fn is_started(&self) -> bool {
        self.inner
            .running
            .lock()
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    /// New notification receiver
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.inner.events.subscribe()
    }

    /// Fetch and install a fresh snapshot.
    ///
    /// On failure the table is left untouched and the error is also
    /// pushed to subscribers.
    pub async fn refresh_snapshot(&self) -> Result<()> {
        self.inner.refresh_snapshot().await
    }

    /// Patch price fields of the coin matching `symbol`. Returns false (and
    /// leaves the table alone) when no coin matches.
    pub fn apply_stream_tick(&self, symbol: &str, price: f64, change_percent: Option<f64>) -> bool {
        self.inner.apply_stream_tick(symbol, price, change_percent)
    }

    /// Add a lightweight coin first observed through the stream, or patch
    /// it when it already exists
    pub fn register_stream_coin(&self, symbol: &str, price: f64, change_percent: Option<f64>) -> Coin {
        self.inner.register_stream_coin(symbol, price, change_percent)
    }

    /// Run one backup-timer decision; returns whether a fetch was made
    pub async fn on_backup_timer(&self) -> bool {
        self.inner.on_backup_timer().await
    }

    /// Run a fast-quote pass over the current table
    pub async fn refresh_quotes(&self) {
        self.inner.refresh_quotes().await
    }

    pub async fn fetch_detail(&self, id: &str) -> Result<CoinDetail> {
        self.inner.services.snapshots.fetch_detail(id).await
    }

    pub async fn load_image(&self, url: &str, symbol_hint: &str) -> LoadedImage {
        self.inner.services.images.load(url, symbol_hint).await
    }

    /// Snapshot of the current coin list
    pub fn coins(&self) -> Vec<Coin> {
        self.inner.read_coins()
    }

    pub fn coin(&self, symbol: &str) -> Option<Coin> {
        self.inner
            .read_coins()
            .into_iter()
            .find(|c| c.matches_symbol(symbol))
    }

    pub fn best_logo_url(&self, symbol: &str) -> Option<String> {
        self.inner.logo_urls.get(symbol)
    }

    pub fn is_stream_connected(&self) -> bool {
        self.inner.services.stream.is_connected()
    }

    /// Low-memory signal: drop the image memory tier
    pub fn on_memory_warning(&self) {
        warn!("Memory warning, clearing image memory cache");
        self.inner.services.images.clear_memory();
    }
}

impl Inner {
    fn emit(&self, event: MarketEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn read_coins(&self) -> Vec<Coin> {
        match self.coins.read() {
            Ok(coins) => coins.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write_coins(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Coin>> {
        match self.coins.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn since_last_fetch(&self) -> Option<std::time::Duration> {
        self.last_fetch
            .lock()
            .ok()
            .and_then(|t| t.map(|at| at.elapsed()))
    }

    #[instrument(skip(self))]
    async fn refresh_snapshot(self: &Arc<Self>) -> Result<()> {
        let query = self.config.market_query();

        let mut coins = match self.services.snapshots.fetch_market_snapshot(&query).await {
            Ok(coins) => coins,
            Err(e) => {
                warn!("Snapshot refresh failed, keeping {} coins: {}", self.read_coins().len(), e);
                self.emit(MarketEvent::Error(e.clone()));
                return Err(e);
            }
        };

        if self.config.merge_fast_quotes {
            coins = self.services.quotes.update_coins(coins).await;
        }

        let merged = self.install_snapshot(coins);
        if let Ok(mut last) = self.last_fetch.lock() {
            *last = Some(Instant::now());
        }
        self.snapshot_loaded.store(true, Ordering::SeqCst);
        info!("Snapshot installed: {} coins", merged.len());

        let tickers: Vec<String> = merged
            .iter()
            .map(|c| SymbolMap::stream_symbol(c.id(), &c.symbol))
            .collect();
        self.services.stream.subscribe(tickers);

        self.emit(MarketEvent::CoinsUpdated(merged.clone()));

        self.spawn_logo_work(&merged);
        Ok(())
    }

    /// Replace the table, keeping tick prices that are fresher than the
    /// snapshot's records
    fn install_snapshot(&self, coins: Vec<Coin>) -> Vec<Coin> {
        let mut table = self.write_coins();
        let merged: Vec<Coin> = {
            let previous: HashMap<&str, &Coin> = table.iter().map(|c| (c.id(), c)).collect();
            coins
                .into_iter()
                .map(|mut coin| {
                    if let Some(prev) = previous.get(coin.id()) {
                        coin.keep_fresher_price(prev);
                    }
                    coin
                })
                .collect()
        };

        *table = merged.clone();
        merged
    }

    fn spawn_logo_work(self: &Arc<Self>, coins: &[Coin]) {
        let symbols: Vec<String> = coins.iter().map(|c| c.symbol.to_uppercase()).collect();
        let inner = self.clone();
        tokio::spawn(async move {
            let discovered = inner.services.quotes.discover_best_logo_urls(&symbols).await;
            debug!("Discovered {} logo URLs", discovered.len());
            inner.logo_urls.extend(discovered);
        });

        let targets: Vec<(String, String)> = coins
            .iter()
            .filter_map(|c| c.image.clone().map(|url| (url, c.symbol.clone())))
            .collect();
        let images = self.services.images.clone();
        tokio::spawn(async move {
            stream::iter(targets)
                .for_each_concurrent(LOGO_PREFETCH_CONCURRENCY, |(url, symbol)| {
                    let images = images.clone();
                    async move {
                        images.load(&url, &symbol).await;
                    }
                })
                .await;
        });
    }

    fn coin_matches(coin: &Coin, symbol: &str) -> bool {
        coin.matches_symbol(symbol)
            || SymbolMap::ticker_for(coin.id())
                .map(|t| t.eq_ignore_ascii_case(symbol))
                .unwrap_or(false)
    }

    fn apply_stream_tick(&self, symbol: &str, price: f64, change_percent: Option<f64>) -> bool {
        let updated = {
            let mut table = self.write_coins();
            table
                .iter_mut()
                .find(|c| Self::coin_matches(c, symbol))
                .map(|coin| {
                    coin.apply_tick(price, change_percent, Utc::now());
                    coin.clone()
                })
        };

        match updated {
            Some(coin) => {
                self.emit(MarketEvent::CoinUpdated(coin));
                true
            }
            None => {
                trace!("Dropping tick for unknown symbol {}", symbol);
                false
            }
        }
    }

    fn register_stream_coin(&self, symbol: &str, price: f64, change_percent: Option<f64>) -> Coin {
        let coin = {
            let mut table = self.write_coins();
            match table.iter_mut().find(|c| Self::coin_matches(c, symbol)) {
                Some(existing) => {
                    existing.apply_tick(price, change_percent, Utc::now());
                    existing.clone()
                }
                None => {
                    let coin = Coin::from_tick(symbol, price, change_percent);
                    debug!("Registered stream-only coin {}", coin.id());
                    table.push(coin.clone());
                    coin
                }
            }
        };

        self.emit(MarketEvent::CoinUpdated(coin.clone()));
        coin
    }

    fn handle_stream_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::Tick(tick) => {
                if self.apply_stream_tick(&tick.symbol, tick.price, tick.change_percent) {
                    return;
                }
                // Before the first snapshot, known tickers get a placeholder record
                if !self.snapshot_loaded.load(Ordering::SeqCst)
                    && SymbolMap::id_for(&tick.symbol).is_some()
                {
                    self.register_stream_coin(&tick.symbol, tick.price, tick.change_percent);
                }
            }
            StreamEvent::Status { connected, error } => {
                if let Some(err) = error {
                    warn!("Price stream error: {}", err);
                }
                let previous = self.stream_connected.swap(connected, Ordering::SeqCst);
                if previous != connected {
                    info!("Price stream {}", if connected { "connected" } else { "disconnected" });
                    self.emit(MarketEvent::ConnectionChanged(connected));
                }
            }
        }
    }

    async fn run_stream_pump(self: Arc<Self>, cancel: CancellationToken) {
        let mut events = self.stream_events.lock().await;
        debug!("Stream pump started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_stream_event(event),
                    None => {
                        debug!("Stream event channel closed");
                        break;
                    }
                },
            }
        }

        debug!("Stream pump stopped");
    }

    async fn on_backup_timer(self: &Arc<Self>) -> bool {
        let connected = self.services.stream.is_connected();
        let age = self.since_last_fetch();

        if should_refresh(connected, age, self.config.backup_interval()) {
            debug!("Backup poll (stream connected: {}, age: {:?})", connected, age);
            let _ = self.refresh_snapshot().await;
            true
        } else {
            trace!("Backup poll skipped, stream healthy");
            false
        }
    }

    async fn run_backup_timer(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.backup_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.on_backup_timer().await;
                }
            }
        }

        debug!("Backup timer stopped");
    }

    async fn refresh_quotes(&self) {
        let current = self.read_coins();
        if current.is_empty() {
            return;
        }

        let quoted = self.services.quotes.update_coins(current).await;
        let by_id: HashMap<&str, &Coin> = quoted.iter().map(|c| (c.id(), c)).collect();

        let merged = {
            let mut table = self.write_coins();
            for coin in table.iter_mut() {
                if let Some(fresh) = by_id.get(coin.id()) {
                    coin.keep_fresher_price(fresh);
                }
            }
            table.clone()
        };

        self.emit(MarketEvent::CoinsUpdated(merged));
    }
}
