//! Key/value settings storage

use coinfeed_core::{Error, MarketDataConfig, Result};
use sqlx::SqlitePool;

/// Settings key under which the market-data config is stored
pub const MARKET_DATA_CONFIG_KEY: &str = "market_data_config";

pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<sqlx::Sqlite, String>("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    Ok(value)
}

pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = ?2",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;

    Ok(())
}

/// Load the stored config, if any. A corrupt row is reported, not ignored.
pub async fn load_market_config(pool: &SqlitePool) -> Result<Option<MarketDataConfig>> {
    match get_setting(pool, MARKET_DATA_CONFIG_KEY).await? {
        Some(json) => MarketDataConfig::from_json(&json).map(Some),
        None => Ok(None),
    }
}

pub async fn save_market_config(pool: &SqlitePool, config: &MarketDataConfig) -> Result<()> {
    let json = serde_json::to_string(config)?;
    set_setting(pool, MARKET_DATA_CONFIG_KEY, &json).await
}
