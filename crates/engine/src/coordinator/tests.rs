use super::*;
use async_trait::async_trait;
use coinfeed_core::{Error, ImageOrigin, MarketQuery, PriceTick};
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::time::timeout;

struct FakeSnapshots {
    next: Mutex<Result<Vec<Coin>>>,
    calls: AtomicUsize,
}

#[async_trait]
impl SnapshotSource for FakeSnapshots {
    async fn fetch_market_snapshot(&self, _query: &MarketQuery) -> Result<Vec<Coin>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next.lock().unwrap().clone()
    }

    async fn fetch_detail(&self, id: &str) -> Result<CoinDetail> {
        Err(Error::NotFound(id.to_string()))
    }
}

#[derive(Default)]
struct FakeQuotes {
    /// (symbol, price) applied by the next quote pass
    quote: Mutex<Option<(String, f64)>>,
    update_calls: AtomicUsize,
}

#[async_trait]
impl QuoteSource for FakeQuotes {
    async fn update_coins(&self, mut coins: Vec<Coin>) -> Vec<Coin> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((symbol, price)) = self.quote.lock().unwrap().clone() {
            for coin in coins.iter_mut().filter(|c| c.matches_symbol(&symbol)) {
                coin.current_price = price;
                coin.last_updated = Some(Utc::now());
            }
        }
        coins
    }

    async fn discover_best_logo_urls(&self, symbols: &[String]) -> HashMap<String, String> {
        symbols
            .iter()
            .map(|s| (s.to_uppercase(), format!("https://logos.example/{}.png", s.to_lowercase())))
            .collect()
    }
}

#[derive(Default)]
struct FakeStream {
    connected: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    subscriptions: Mutex<Vec<Vec<String>>>,
}

impl PriceStream for FakeStream {
    fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn subscribe(&self, symbols: Vec<String>) {
        self.subscriptions.lock().unwrap().push(symbols);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct FakeImages {
    loads: AtomicUsize,
    clears: AtomicUsize,
}

#[async_trait]
impl ImageStore for FakeImages {
    async fn load(&self, _url: &str, _symbol_hint: &str) -> LoadedImage {
        self.loads.fetch_add(1, Ordering::SeqCst);
        LoadedImage::new(vec![0x89, 0x50], ImageOrigin::Network)
    }

    fn clear_memory(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    coordinator: MarketDataCoordinator,
    snapshots: Arc<FakeSnapshots>,
    quotes: Arc<FakeQuotes>,
    stream: Arc<FakeStream>,
    images: Arc<FakeImages>,
    stream_tx: mpsc::UnboundedSender<StreamEvent>,
}

fn snapshot_coins() -> Vec<Coin> {
    let stamped = Utc::now() - chrono::Duration::hours(1);

    let mut btc = Coin::new("bitcoin", "btc", "Bitcoin", 67012.0);
    btc.image = Some("https://img.example/btc.png".into());
    btc.price_change_percentage = 1.8;
    btc.market_cap = Some(1.32e12);
    btc.market_cap_rank = Some(1);
    btc.total_volume = Some(3.1e10);
    btc.last_updated = Some(stamped);

    let mut eth = Coin::new("ethereum", "eth", "Ethereum", 3200.1);
    eth.image = Some("https://img.example/eth.png".into());
    eth.price_change_percentage = -1.25;
    eth.market_cap_rank = Some(2);
    eth.last_updated = Some(stamped);

    vec![btc, eth]
}

fn harness_with(snapshot: Result<Vec<Coin>>) -> Harness {
    let snapshots = Arc::new(FakeSnapshots {
        next: Mutex::new(snapshot),
        calls: AtomicUsize::new(0),
    });
    let quotes = Arc::new(FakeQuotes::default());
    let stream = Arc::new(FakeStream::default());
    let images = Arc::new(FakeImages::default());
    let (stream_tx, stream_rx) = mpsc::unbounded_channel();

    let config = MarketDataConfig {
        backup_interval_secs: 60,
        ..Default::default()
    };
    let services = MarketServices {
        snapshots: snapshots.clone(),
        quotes: quotes.clone(),
        stream: stream.clone(),
        images: images.clone(),
    };

    Harness {
        coordinator: MarketDataCoordinator::new(config, services, stream_rx),
        snapshots,
        quotes,
        stream,
        images,
        stream_tx,
    }
}

fn harness() -> Harness {
    harness_with(Ok(snapshot_coins()))
}

async fn next_event(rx: &mut broadcast::Receiver<MarketEvent>) -> MarketEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn prices(coins: &[Coin]) -> Vec<(String, f64, f64)> {
    coins
        .iter()
        .map(|c| (c.id().to_string(), c.current_price, c.price_change_percentage))
        .collect()
}

#[tokio::test]
async fn test_refresh_installs_snapshot_and_subscribes() {
    let h = harness();
    let mut rx = h.coordinator.subscribe();

    h.coordinator.refresh_snapshot().await.unwrap();

    assert_eq!(h.coordinator.coins().len(), 2);
    match next_event(&mut rx).await {
        MarketEvent::CoinsUpdated(coins) => assert_eq!(coins.len(), 2),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(h.quotes.update_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.stream.subscriptions.lock().unwrap().last().cloned(),
        Some(vec!["BTC".to_string(), "ETH".to_string()])
    );

    // Logo discovery and prefetch run in the background
    for _ in 0..100 {
        if h.coordinator.best_logo_url("btc").is_some() && h.images.loads.load(Ordering::SeqCst) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        h.coordinator.best_logo_url("BTC").as_deref(),
        Some("https://logos.example/btc.png")
    );
    assert_eq!(h.images.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_table() {
    let h = harness();
    h.coordinator.refresh_snapshot().await.unwrap();
    let before = prices(&h.coordinator.coins());

    let mut rx = h.coordinator.subscribe();
    *h.snapshots.next.lock().unwrap() = Err(Error::Transport("connection reset".into()));

    let err = h.coordinator.refresh_snapshot().await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(prices(&h.coordinator.coins()), before);

    match next_event(&mut rx).await {
        MarketEvent::Error(e) => assert_eq!(e, Error::Transport("connection reset".into())),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_tick_patches_only_price_fields() {
    let h = harness();
    h.coordinator.refresh_snapshot().await.unwrap();
    let before = h.coordinator.coin("btc").unwrap();
    let mut rx = h.coordinator.subscribe();

    assert!(h.coordinator.apply_stream_tick("BTC", 67000.5, Some(2.3)));

    let after = h.coordinator.coin("Btc").unwrap();
    assert_eq!(after.current_price, 67000.5);
    assert_eq!(after.price_change_percentage, 2.3);
    assert_eq!(after.id(), before.id());
    assert_eq!(after.name, before.name);
    assert_eq!(after.image, before.image);
    assert_eq!(after.market_cap, before.market_cap);
    assert_eq!(after.market_cap_rank, before.market_cap_rank);
    assert_eq!(after.total_volume, before.total_volume);

    match next_event(&mut rx).await {
        MarketEvent::CoinUpdated(coin) => assert_eq!(coin.current_price, 67000.5),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_tick_leaves_table_unchanged() {
    let h = harness();
    h.coordinator.refresh_snapshot().await.unwrap();
    let before = prices(&h.coordinator.coins());

    assert!(!h.coordinator.apply_stream_tick("ZZZ", 1.0, Some(5.0)));
    assert_eq!(prices(&h.coordinator.coins()), before);
}

#[tokio::test]
async fn test_snapshot_merge_keeps_fresher_tick_price() {
    let h = harness();
    h.coordinator.refresh_snapshot().await.unwrap();
    h.coordinator.apply_stream_tick("ETH", 3300.0, Some(1.5));

    // Same records again, stamped an hour ago
    h.coordinator.refresh_snapshot().await.unwrap();

    let eth = h.coordinator.coin("eth").unwrap();
    assert_eq!(eth.current_price, 3300.0);
    assert_eq!(eth.price_change_percentage, 1.5);
    assert_eq!(h.coordinator.coin("btc").unwrap().current_price, 67012.0);
}

#[tokio::test]
async fn test_refresh_quotes_applies_newer_prices() {
    let h = harness();
    h.coordinator.refresh_snapshot().await.unwrap();
    *h.quotes.quote.lock().unwrap() = Some(("btc".to_string(), 68000.0));

    let mut rx = h.coordinator.subscribe();
    h.coordinator.refresh_quotes().await;

    assert_eq!(h.coordinator.coin("btc").unwrap().current_price, 68000.0);
    assert_eq!(h.coordinator.coin("eth").unwrap().current_price, 3200.1);
    assert!(matches!(next_event(&mut rx).await, MarketEvent::CoinsUpdated(_)));
}

#[tokio::test]
async fn test_register_stream_coin() {
    let h = harness();
    let sol = h.coordinator.register_stream_coin("SOL", 150.0, Some(4.0));
    assert_eq!(sol.id(), "solana");
    assert_eq!(h.coordinator.coins().len(), 1);

    let again = h.coordinator.register_stream_coin("sol", 151.0, None);
    assert_eq!(again.current_price, 151.0);
    assert_eq!(again.price_change_percentage, 4.0);
    assert_eq!(h.coordinator.coins().len(), 1);
}

#[tokio::test]
async fn test_stream_events_before_first_snapshot() {
    let h = harness_with(Err(Error::Transport("offline".into())));
    let mut rx = h.coordinator.subscribe();
    h.coordinator.start();

    h.stream_tx
        .send(StreamEvent::Status { connected: true, error: None })
        .unwrap();
    let tick = |symbol: &str, price: f64| {
        StreamEvent::Tick(PriceTick {
            symbol: symbol.to_string(),
            price,
            change_percent: Some(1.0),
        })
    };
    h.stream_tx.send(tick("ZZZ", 1.0)).unwrap();
    h.stream_tx.send(tick("SOL", 150.0)).unwrap();

    let mut saw_connection = false;
    loop {
        match next_event(&mut rx).await {
            MarketEvent::ConnectionChanged(true) => saw_connection = true,
            MarketEvent::CoinUpdated(coin) => {
                assert_eq!(coin.id(), "solana");
                break;
            }
            MarketEvent::Error(_) => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert!(saw_connection);

    let coins = h.coordinator.coins();
    assert_eq!(coins.len(), 1);
    assert!(coins[0].matches_symbol("sol"));

    h.coordinator.stop();
}

#[tokio::test]
async fn test_start_is_idempotent_and_stop_repeatable() {
    let h = harness();
    let mut rx = h.coordinator.subscribe();

    h.coordinator.start();
    h.coordinator.start();
    assert!(h.coordinator.is_started());

    assert!(matches!(next_event(&mut rx).await, MarketEvent::CoinsUpdated(_)));
    assert_eq!(h.stream.connects.load(Ordering::SeqCst), 1);
    assert_eq!(h.snapshots.calls.load(Ordering::SeqCst), 1);

    h.coordinator.stop();
    h.coordinator.stop();
    assert!(!h.coordinator.is_started());
    assert_eq!(h.stream.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backup_poll_suppressed_while_stream_healthy() {
    let h = harness();
    h.stream.connected.store(true, Ordering::SeqCst);
    h.coordinator.refresh_snapshot().await.unwrap();
    assert_eq!(h.snapshots.calls.load(Ordering::SeqCst), 1);

    assert!(!h.coordinator.on_backup_timer().await);
    tokio::time::advance(Duration::from_secs(119)).await;
    assert!(!h.coordinator.on_backup_timer().await);
    assert_eq!(h.snapshots.calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(h.coordinator.on_backup_timer().await);
    assert_eq!(h.snapshots.calls.load(Ordering::SeqCst), 2);

    h.stream.connected.store(false, Ordering::SeqCst);
    assert!(h.coordinator.on_backup_timer().await);
    assert_eq!(h.snapshots.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_backup_timer_polls_while_stream_down() {
    let h = harness();
    let mut rx = h.coordinator.subscribe();
    h.coordinator.start();

    // Initial fetch, then one from the timer after one interval
    for _ in 0..2 {
        loop {
            if let MarketEvent::CoinsUpdated(_) = rx.recv().await.unwrap() {
                break;
            }
        }
    }
    assert_eq!(h.snapshots.calls.load(Ordering::SeqCst), 2);

    h.coordinator.stop();
}

#[tokio::test]
async fn test_passthrough_commands() {
    let h = harness();

    h.coordinator.on_memory_warning();
    assert_eq!(h.images.clears.load(Ordering::SeqCst), 1);

    let image = h.coordinator.load_image("https://img.example/btc.png", "BTC").await;
    assert_eq!(image.len(), 2);

    let err = h.coordinator.fetch_detail("nope").await.unwrap_err();
    assert_eq!(err, Error::NotFound("nope".into()));
    assert!(!h.coordinator.is_stream_connected());
}
