//! Database connectivity probe.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::time::{Duration, Instant};

/// Round-trip a trivial query, returning how long it took.
pub async fn ping(pool: &PgPool) -> Result<Duration> {
    let start = Instant::now();
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .context("database ping failed")?;
    Ok(start.elapsed())
}
