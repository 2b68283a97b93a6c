//! Small key-value store for state that must survive restarts.
//!
//! Backed by the UNLOGGED `app_kv` table: scheduler timestamps and similar
//! bookkeeping that is safe to lose on crash recovery.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub async fn get(pool: &PgPool, key: &str) -> Result<Option<String>> {
    sqlx::query_scalar::<_, String>("SELECT value FROM app_kv WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to read app_kv '{key}'"))
}

pub async fn set(pool: &PgPool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO app_kv (key, value) VALUES ($1, $2) \
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .with_context(|| format!("failed to write app_kv '{key}'"))?;
    Ok(())
}

/// Timestamps are stored as RFC 3339 strings; unparseable values read as absent.
pub async fn get_timestamp(pool: &PgPool, key: &str) -> Result<Option<DateTime<Utc>>> {
    let value = get(pool, key).await?;
    Ok(value.and_then(|v| DateTime::parse_from_rfc3339(&v).ok().map(|dt| dt.to_utc())))
}

pub async fn set_timestamp(pool: &PgPool, key: &str, ts: DateTime<Utc>) -> Result<()> {
    set(pool, key, &ts.to_rfc3339()).await
}
