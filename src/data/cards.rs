//! Database operations for the `cards` table (the owned-card inventory).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use ts_rs::TS;

/// One owned printing: a (catalog_id, set_code) pair with a quantity.
///
/// `market_price` is the single canonical resolved-price column; 0 means
/// "never priced". Rows are deleted when quantity reaches 0.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, TS)]
#[ts(export)]
pub struct OwnedCard {
    pub id: i32,
    #[ts(type = "number")]
    pub catalog_id: i64,
    pub name: String,
    pub set_code: String,
    pub set_rarity: String,
    pub quantity: i32,
    pub market_price: f64,
    pub image_url: String,
    pub image_url_small: String,
    pub price_updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, catalog_id, name, set_code, set_rarity, quantity, \
                       market_price, image_url, image_url_small, price_updated_at";

/// List the inventory, optionally filtered by a case-insensitive name search.
pub async fn list(pool: &PgPool, search: Option<&str>) -> Result<Vec<OwnedCard>> {
    let rows = match search {
        Some(needle) if !needle.is_empty() => {
            sqlx::query_as::<_, OwnedCard>(&format!(
                "SELECT {COLUMNS} FROM cards WHERE name ILIKE '%' || $1 || '%' ORDER BY name"
            ))
            .bind(needle)
            .fetch_all(pool)
            .await
        }
        _ => {
            sqlx::query_as::<_, OwnedCard>(&format!(
                "SELECT {COLUMNS} FROM cards ORDER BY name"
            ))
            .fetch_all(pool)
            .await
        }
    };
    rows.context("failed to list cards")
}

pub async fn find_by_printing(
    pool: &PgPool,
    catalog_id: i64,
    set_code: &str,
) -> Result<Option<OwnedCard>> {
    sqlx::query_as::<_, OwnedCard>(&format!(
        "SELECT {COLUMNS} FROM cards WHERE catalog_id = $1 AND set_code = $2"
    ))
    .bind(catalog_id)
    .bind(set_code)
    .fetch_optional(pool)
    .await
    .context("failed to fetch card by printing")
}

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &PgPool,
    catalog_id: i64,
    name: &str,
    set_code: &str,
    set_rarity: &str,
    quantity: i32,
    market_price: f64,
    image_url: &str,
    image_url_small: &str,
) -> Result<OwnedCard> {
    sqlx::query_as::<_, OwnedCard>(&format!(
        r#"
        INSERT INTO cards
            (catalog_id, name, set_code, set_rarity, quantity,
             market_price, image_url, image_url_small, price_updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
        RETURNING {COLUMNS}
        "#
    ))
    .bind(catalog_id)
    .bind(name)
    .bind(set_code)
    .bind(set_rarity)
    .bind(quantity)
    .bind(market_price)
    .bind(image_url)
    .bind(image_url_small)
    .fetch_one(pool)
    .await
    .context("failed to insert card")
}

/// Adjust quantity by a signed delta, returning the updated row.
pub async fn add_quantity(pool: &PgPool, id: i32, delta: i32) -> Result<Option<OwnedCard>> {
    sqlx::query_as::<_, OwnedCard>(&format!(
        "UPDATE cards SET quantity = quantity + $2 WHERE id = $1 RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(delta)
    .fetch_optional(pool)
    .await
    .context("failed to adjust card quantity")
}

/// Decrement quantity by `amount`, flooring at zero. Returns the updated row
/// and how many were actually removed, which is less than `amount` when the
/// floor was hit.
pub async fn decrement_clamped(
    pool: &PgPool,
    id: i32,
    amount: i32,
) -> Result<Option<(OwnedCard, i32)>> {
    #[derive(sqlx::FromRow)]
    struct DecrementRow {
        #[sqlx(flatten)]
        card: OwnedCard,
        removed: i32,
    }

    let row = sqlx::query_as::<_, DecrementRow>(&format!(
        r#"
        UPDATE cards SET quantity = GREATEST(cards.quantity - $2, 0)
        FROM (SELECT id AS prev_id, quantity AS prev_quantity FROM cards WHERE id = $1) prev
        WHERE cards.id = prev.prev_id
        RETURNING {COLUMNS}, LEAST($2, prev_quantity) AS removed
        "#
    ))
    .bind(id)
    .bind(amount)
    .fetch_optional(pool)
    .await
    .context("failed to decrement card quantity")?;
    Ok(row.map(|r| (r.card, r.removed)))
}

pub async fn set_quantity(pool: &PgPool, id: i32, quantity: i32) -> Result<Option<OwnedCard>> {
    sqlx::query_as::<_, OwnedCard>(&format!(
        "UPDATE cards SET quantity = $2 WHERE id = $1 RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(quantity)
    .fetch_optional(pool)
    .await
    .context("failed to set card quantity")
}

/// Delete a row, returning whether it existed.
pub async fn delete(pool: &PgPool, id: i32) -> Result<bool> {
    let result = sqlx::query("DELETE FROM cards WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete card")?;
    Ok(result.rows_affected() > 0)
}

/// Record a freshly resolved price and stamp the update time.
pub async fn update_price(pool: &PgPool, id: i32, market_price: f64) -> Result<()> {
    sqlx::query("UPDATE cards SET market_price = $2, price_updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(market_price)
        .execute(pool)
        .await
        .context("failed to update card price")?;
    Ok(())
}

/// Backfill catalog images onto a row that is missing them.
pub async fn update_images(
    pool: &PgPool,
    id: i32,
    image_url: &str,
    image_url_small: &str,
) -> Result<()> {
    sqlx::query("UPDATE cards SET image_url = $2, image_url_small = $3 WHERE id = $1")
        .bind(id)
        .bind(image_url)
        .bind(image_url_small)
        .execute(pool)
        .await
        .context("failed to update card images")?;
    Ok(())
}

/// Rows whose resolved price is older than `cutoff` (for the daily refresh).
pub async fn list_stale_prices(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<Vec<OwnedCard>> {
    sqlx::query_as::<_, OwnedCard>(&format!(
        "SELECT {COLUMNS} FROM cards WHERE price_updated_at < $1 ORDER BY price_updated_at"
    ))
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .context("failed to list stale-priced cards")
}
