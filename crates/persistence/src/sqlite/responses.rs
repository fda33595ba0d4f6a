//! HTTP response cache backing the REST degraded mode

use chrono::{DateTime, Duration, Utc};
use coinfeed_core::{Error, Result};
use sqlx::SqlitePool;

/// A stored successful response, keyed by the exact request URL
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CachedResponse {
    pub cache_key: String,
    pub status: i64,
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    /// Age relative to now
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.stored_at)
    }
}

/// Store (or replace) the body for a request key
pub async fn store_response(
    pool: &SqlitePool,
    cache_key: &str,
    status: u16,
    body: &[u8],
) -> Result<()> {
    sqlx::query(
        "INSERT INTO http_responses (cache_key, status, body, stored_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(cache_key) DO UPDATE SET status = ?2, body = ?3, stored_at = ?4",
    )
    .bind(cache_key)
    .bind(status as i64)
    .bind(body)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;

    Ok(())
}

/// Look up the last stored response for an identical request
pub async fn get_response(pool: &SqlitePool, cache_key: &str) -> Result<Option<CachedResponse>> {
    let cached = sqlx::query_as::<_, CachedResponse>(
        "SELECT cache_key, status, body, stored_at FROM http_responses WHERE cache_key = ?",
    )
    .bind(cache_key)
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;

    Ok(cached)
}

/// Remove responses older than `max_age`. Returns the number deleted.
pub async fn purge_responses_older_than(pool: &SqlitePool, max_age: Duration) -> Result<u64> {
    let cutoff = Utc::now() - max_age;
    let result = sqlx::query("DELETE FROM http_responses WHERE stored_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    Ok(result.rows_affected())
}

/// Drop every stored response
pub async fn clear_responses(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM http_responses")
        .execute(pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    Ok(())
}
