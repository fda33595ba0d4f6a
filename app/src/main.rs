//! Coinfeed - headless market data service

use anyhow::Context;
use clap::Parser;
use coinfeed_core::{Coin, MarketDataConfig, StreamProviderKind};
use coinfeed_engine::{MarketDataCoordinator, MarketEvent, MarketServices};
use coinfeed_networking::{ImageCache, MarketClient, QuoteClient, StreamConnection};
use coinfeed_persistence::sqlite::{self, Database};
use coinfeed_persistence::DiskImageCache;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Cached REST responses older than this are purged at startup
const RESPONSE_CACHE_MAX_AGE_DAYS: i64 = 7;

#[derive(Parser, Debug)]
#[command(name = "coinfeed", version, about = "Real-time crypto market data aggregator")]
struct Args {
    /// JSON config file (partial documents are fine)
    #[arg(long, env = "COINFEED_CONFIG")]
    config: Option<PathBuf>,

    /// Streaming provider: binance or cryptocompare
    #[arg(long)]
    provider: Option<StreamProviderKind>,

    /// Coins per snapshot page
    #[arg(long)]
    page_size: Option<u32>,

    /// Directory for the app database
    #[arg(long, env = "COINFEED_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Fetch one snapshot, print it and exit
    #[arg(long)]
    once: bool,

    /// Store the effective config in the settings table
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "coinfeed=info,coinfeed_engine=debug,coinfeed_networking=info,coinfeed_persistence=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("Starting Coinfeed v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = args.data_dir.clone().unwrap_or_else(|| {
        dirs_next::data_local_dir()
            .map(|p| p.join("Coinfeed"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let db = Database::connect(&data_dir.join("coinfeed.db"))
        .await
        .context("failed to open app database")?;

    let purged = sqlite::purge_responses_older_than(
        db.pool(),
        chrono::Duration::days(RESPONSE_CACHE_MAX_AGE_DAYS),
    )
    .await?;
    if purged > 0 {
        debug!("Purged {} stale cached responses", purged);
    }

    let mut config = load_config(&args, &db).await?;
    if let Some(provider) = args.provider {
        config.stream_provider = provider;
    }
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }
    config.validate()?;

    if args.save_config {
        sqlite::save_market_config(db.pool(), &config).await?;
        info!("Config saved to settings");
    }

    let image_dir = config.image_cache_dir.clone().unwrap_or_else(|| {
        dirs_next::cache_dir()
            .map(|p| p.join("Coinfeed").join("images"))
            .unwrap_or_else(|| data_dir.join("images"))
    });
    let disk = DiskImageCache::open(&image_dir)
        .await
        .with_context(|| format!("failed to open image cache at {}", image_dir.display()))?;

    let (stream, stream_events) = StreamConnection::from_config(&config);
    let services = MarketServices {
        snapshots: Arc::new(MarketClient::new_with_cache(&config, db.clone())?),
        quotes: Arc::new(QuoteClient::new(&config)?),
        stream: Arc::new(stream),
        images: Arc::new(ImageCache::new(&config, Some(disk))?),
    };
    let coordinator = MarketDataCoordinator::new(config.clone(), services, stream_events);

    if args.once {
        coordinator.refresh_snapshot().await?;
        print_table(&coordinator.coins());
        return Ok(());
    }

    let mut events = coordinator.subscribe();
    coordinator.start();
    info!(
        "Streaming from {} (backup poll every {}s)",
        config.stream_provider, config.backup_interval_secs
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&coordinator, event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event consumer lagged, skipped {} notifications", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    coordinator.stop();
    Ok(())
}

/// `--config` file, then the settings table, then defaults
async fn load_config(args: &Args, db: &Database) -> anyhow::Result<MarketDataConfig> {
    if let Some(path) = &args.config {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = MarketDataConfig::from_json(&json)
            .with_context(|| format!("invalid config in {}", path.display()))?;
        info!("Config loaded from {}", path.display());
        return Ok(config);
    }

    match sqlite::load_market_config(db.pool()).await? {
        Some(config) => {
            info!("Config loaded from settings");
            Ok(config)
        }
        None => Ok(MarketDataConfig::default()),
    }
}

fn log_event(coordinator: &MarketDataCoordinator, event: MarketEvent) {
    match event {
        MarketEvent::CoinsUpdated(coins) => {
            info!("Coin list updated: {} coins", coins.len());
        }
        MarketEvent::CoinUpdated(coin) => {
            debug!(
                "{} {:.6} ({:+.2}%){}",
                coin.symbol.to_uppercase(),
                coin.current_price,
                coin.price_change_percentage,
                coordinator
                    .best_logo_url(&coin.symbol)
                    .map(|url| format!(" logo={}", url))
                    .unwrap_or_default()
            );
        }
        MarketEvent::Error(e) => warn!("Market data error: {}", e),
        MarketEvent::ConnectionChanged(connected) => {
            info!("Price stream {}", if connected { "connected" } else { "disconnected" });
        }
    }
}

fn print_table(coins: &[Coin]) {
    println!("{:>4}  {:<8} {:<24} {:>16} {:>9}", "#", "SYMBOL", "NAME", "PRICE", "CHANGE");
    for coin in coins {
        println!(
            "{:>4}  {:<8} {:<24} {:>16.6} {:>+8.2}%",
            coin.market_cap_rank.map(|r| r.to_string()).unwrap_or_default(),
            coin.symbol.to_uppercase(),
            coin.name,
            coin.current_price,
            coin.price_change_percentage
        );
    }
}
