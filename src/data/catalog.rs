//! Database operations for the `card_catalog` table (bulk upstream mirror).

use crate::catalog::{CardImage, CardSet, CatalogCard, PriceQuote};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

/// Batch size for snapshot inserts; the full catalog runs to five digits of
/// rows and a single statement would exceed sane bind limits.
const INSERT_BATCH: usize = 500;

#[derive(Debug, sqlx::FromRow)]
struct CatalogRow {
    id: i64,
    name: String,
    card_type: String,
    description: String,
    sets: Json<Vec<CardSet>>,
    images: Json<Vec<CardImage>>,
    quotes: Json<Vec<PriceQuote>>,
}

impl From<CatalogRow> for CatalogCard {
    fn from(row: CatalogRow) -> Self {
        CatalogCard {
            id: row.id,
            name: row.name,
            card_type: row.card_type,
            description: row.description,
            sets: row.sets.0,
            images: row.images.0,
            quotes: row.quotes.0,
        }
    }
}

const COLUMNS: &str = "id, name, card_type, description, sets, images, quotes";

pub async fn count(pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM card_catalog")
        .fetch_one(pool)
        .await
        .context("failed to count catalog rows")
}

/// Timestamp of the oldest mirrored row; the snapshot's freshness is judged
/// by its worst row, not its best.
pub async fn oldest_cached_at(pool: &PgPool) -> Result<Option<DateTime<Utc>>> {
    sqlx::query_scalar::<_, Option<DateTime<Utc>>>("SELECT MIN(cached_at) FROM card_catalog")
        .fetch_one(pool)
        .await
        .context("failed to read oldest catalog timestamp")
}

/// Replace the entire mirror with a fresh snapshot in one transaction.
pub async fn replace_all(pool: &PgPool, cards: &[CatalogCard]) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query("DELETE FROM card_catalog")
        .execute(&mut *tx)
        .await
        .context("failed to clear catalog mirror")?;

    for chunk in cards.chunks(INSERT_BATCH) {
        let ids: Vec<i64> = chunk.iter().map(|c| c.id).collect();
        let names: Vec<&str> = chunk.iter().map(|c| c.name.as_str()).collect();
        let types: Vec<&str> = chunk.iter().map(|c| c.card_type.as_str()).collect();
        let descriptions: Vec<&str> = chunk.iter().map(|c| c.description.as_str()).collect();
        let sets: Vec<serde_json::Value> = chunk
            .iter()
            .map(|c| serde_json::to_value(&c.sets))
            .collect::<Result<_, _>>()
            .context("failed to encode card sets")?;
        let images: Vec<serde_json::Value> = chunk
            .iter()
            .map(|c| serde_json::to_value(&c.images))
            .collect::<Result<_, _>>()
            .context("failed to encode card images")?;
        let quotes: Vec<serde_json::Value> = chunk
            .iter()
            .map(|c| serde_json::to_value(&c.quotes))
            .collect::<Result<_, _>>()
            .context("failed to encode price quotes")?;

        sqlx::query(
            r#"
            INSERT INTO card_catalog (id, name, card_type, description, sets, images, quotes, cached_at)
            SELECT *, now()
            FROM UNNEST($1::bigint[], $2::text[], $3::text[], $4::text[],
                        $5::jsonb[], $6::jsonb[], $7::jsonb[])
            "#,
        )
        .bind(&ids)
        .bind(&names)
        .bind(&types)
        .bind(&descriptions)
        .bind(&sets)
        .bind(&images)
        .bind(&quotes)
        .execute(&mut *tx)
        .await
        .context("failed to insert catalog batch")?;
    }

    tx.commit().await.context("failed to commit catalog replace")
}

pub async fn get_by_id(pool: &PgPool, id: i64) -> Result<Option<CatalogCard>> {
    let row = sqlx::query_as::<_, CatalogRow>(&format!(
        "SELECT {COLUMNS} FROM card_catalog WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch catalog card")?;
    Ok(row.map(CatalogCard::from))
}

/// Fetch a batch of catalog cards in one round trip (inventory enrichment).
pub async fn get_by_ids(pool: &PgPool, ids: &[i64]) -> Result<Vec<CatalogCard>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, CatalogRow>(&format!(
        "SELECT {COLUMNS} FROM card_catalog WHERE id = ANY($1)"
    ))
    .bind(ids)
    .fetch_all(pool)
    .await
    .context("failed to fetch catalog cards by id")?;
    Ok(rows.into_iter().map(CatalogCard::from).collect())
}

/// Case-insensitive name search over the mirror.
pub async fn search_by_name(pool: &PgPool, name: &str, limit: i64) -> Result<Vec<CatalogCard>> {
    let rows = sqlx::query_as::<_, CatalogRow>(&format!(
        "SELECT {COLUMNS} FROM card_catalog WHERE name ILIKE '%' || $1 || '%' ORDER BY name LIMIT $2"
    ))
    .bind(name)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to search catalog")?;
    Ok(rows.into_iter().map(CatalogCard::from).collect())
}
