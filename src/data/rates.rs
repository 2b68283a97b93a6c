//! Database operations for the `exchange_rates` table (singleton per pair).

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub async fn get(
    pool: &PgPool,
    from_currency: &str,
    to_currency: &str,
) -> Result<Option<(f64, DateTime<Utc>)>> {
    sqlx::query_as::<_, (f64, DateTime<Utc>)>(
        "SELECT rate, updated_at FROM exchange_rates WHERE from_currency = $1 AND to_currency = $2",
    )
    .bind(from_currency)
    .bind(to_currency)
    .fetch_optional(pool)
    .await
    .context("failed to fetch exchange rate")
}

/// Idempotent upsert keyed by the currency pair; a concurrent writer in
/// another process just means last-writer-wins.
pub async fn upsert(pool: &PgPool, from_currency: &str, to_currency: &str, rate: f64) -> Result<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(anyhow!("refusing to persist invalid rate {rate}"));
    }
    sqlx::query(
        r#"
        INSERT INTO exchange_rates (from_currency, to_currency, rate, updated_at)
        VALUES ($1, $2, $3, now())
        ON CONFLICT (from_currency, to_currency)
        DO UPDATE SET rate = EXCLUDED.rate, updated_at = now()
        "#,
    )
    .bind(from_currency)
    .bind(to_currency)
    .bind(rate)
    .execute(pool)
    .await
    .context("failed to upsert exchange rate")?;
    Ok(())
}
