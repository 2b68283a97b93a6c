//! Card catalog: YGOPRODeck wire types, snapshot download, and the bulk
//! cache backing.
//!
//! The upstream has no incremental endpoint, so a refresh downloads the
//! complete snapshot and replaces the `card_catalog` table transactionally.
//! The cache value is therefore not the dataset itself but a small
//! [`CatalogStamp`]; consumers read individual cards through
//! [`crate::data::catalog`] after `get()` confirms freshness.

use crate::cache::{Backing, FetchError};
use crate::json::parse_json_with_path;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use ts_rs::TS;

/// One printing of a card in a specific set.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CardSet {
    pub set_name: String,
    pub set_code: String,
    pub set_rarity: String,
    #[serde(default)]
    pub set_price: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CardImage {
    pub image_url: String,
    #[serde(default)]
    pub image_url_small: String,
}

/// A marketplace price quote. Position in the quote list encodes trust;
/// the resolver only ever consults the head.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PriceQuote {
    pub source: String,
    pub price: String,
}

/// A catalog card as cached locally.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct CatalogCard {
    pub id: i64,
    pub name: String,
    pub card_type: String,
    pub description: String,
    pub sets: Vec<CardSet>,
    pub images: Vec<CardImage>,
    pub quotes: Vec<PriceQuote>,
}

/// What the bulk cache instance actually caches: proof that the mirrored
/// table is populated and fresh, not the thousands of rows themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStamp {
    pub cards: i64,
}

// -- Wire shapes (cardinfo.php) --

#[derive(Deserialize)]
struct ApiResponse {
    data: Vec<ApiCard>,
}

#[derive(Deserialize)]
struct ApiCard {
    id: i64,
    name: String,
    #[serde(rename = "type", default)]
    card_type: String,
    #[serde(rename = "desc", default)]
    description: String,
    #[serde(default)]
    card_sets: Vec<CardSet>,
    #[serde(default)]
    card_images: Vec<CardImage>,
    #[serde(default)]
    card_prices: Vec<ApiPrices>,
}

#[derive(Deserialize, Default)]
struct ApiPrices {
    #[serde(default)]
    tcgplayer_price: String,
    #[serde(default)]
    cardmarket_price: String,
    #[serde(default)]
    ebay_price: String,
    #[serde(default)]
    amazon_price: String,
    #[serde(default)]
    coolstuffinc_price: String,
}

impl ApiPrices {
    /// Flatten to the ordered quote list. TCGplayer leads; entries are kept
    /// even when empty so the resolver's "first quote" is stable.
    fn into_quotes(self) -> Vec<PriceQuote> {
        let quote = |source: &str, price: String| PriceQuote {
            source: source.to_owned(),
            price,
        };
        vec![
            quote("tcgplayer", self.tcgplayer_price),
            quote("cardmarket", self.cardmarket_price),
            quote("ebay", self.ebay_price),
            quote("amazon", self.amazon_price),
            quote("coolstuffinc", self.coolstuffinc_price),
        ]
    }
}

impl From<ApiCard> for CatalogCard {
    fn from(card: ApiCard) -> Self {
        let quotes = card
            .card_prices
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_quotes();
        CatalogCard {
            id: card.id,
            name: card.name,
            card_type: card.card_type,
            description: card.description,
            sets: card.card_sets,
            images: card.card_images,
            quotes,
        }
    }
}

/// Bulk variant of the cache backing: persistent freshness is keyed on the
/// oldest mirrored row, and `fetch` itself replaces the whole table (the
/// replace must be one transaction, so `store` has nothing left to do).
pub struct CatalogBacking {
    pool: PgPool,
    http: reqwest::Client,
    api_url: String,
}

impl CatalogBacking {
    pub fn new(pool: PgPool, http: reqwest::Client, api_url: String) -> Self {
        Self {
            pool,
            http,
            api_url,
        }
    }

    async fn download_snapshot(&self) -> Result<Vec<CatalogCard>, FetchError> {
        let response = self
            .http
            .get(&self.api_url)
            .send()
            .await
            .map_err(|e| FetchError::Unavailable(anyhow!(e).context("catalog request failed")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unavailable(anyhow!(
                "catalog API returned {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Unavailable(anyhow!(e).context("catalog body read failed")))?;

        let parsed: ApiResponse = parse_json_with_path(&body).map_err(FetchError::Malformed)?;
        Ok(parsed.data.into_iter().map(CatalogCard::from).collect())
    }
}

#[async_trait]
impl Backing for CatalogBacking {
    type Value = CatalogStamp;

    fn source(&self) -> &'static str {
        "catalog"
    }

    async fn load(&self) -> Result<Option<(CatalogStamp, DateTime<Utc>)>, FetchError> {
        let cards = crate::data::catalog::count(&self.pool)
            .await
            .map_err(FetchError::Unavailable)?;
        if cards == 0 {
            return Ok(None);
        }
        let oldest = crate::data::catalog::oldest_cached_at(&self.pool)
            .await
            .map_err(FetchError::Unavailable)?;
        Ok(oldest.map(|cached_at| (CatalogStamp { cards }, cached_at)))
    }

    async fn fetch(&self) -> Result<CatalogStamp, FetchError> {
        let cards = self.download_snapshot().await?;
        let count = cards.len() as i64;
        info!(cards = count, "downloaded catalog snapshot");

        crate::data::catalog::replace_all(&self.pool, &cards)
            .await
            .context("failed to replace catalog mirror")
            .map_err(FetchError::Unavailable)?;

        info!(cards = count, "catalog mirror replaced");
        Ok(CatalogStamp { cards: count })
    }

    async fn store(&self, _value: &CatalogStamp) -> Result<(), FetchError> {
        // The snapshot replace happened transactionally inside `fetch`.
        Ok(())
    }
}
