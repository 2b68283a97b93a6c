//! Inventory handlers: the public listing plus the authenticated edit
//! surface (add, quantity changes, delete).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};
use ts_rs::TS;

use crate::catalog::CatalogCard;
use crate::data::cards::{self, OwnedCard};
use crate::data::catalog;
use crate::pricing::resolve_price;
use crate::state::AppState;
use crate::web::auth::AuthUser;
use crate::web::error::{ApiError, db_error};
use crate::web::routes::{cache, with_cache_control};

#[derive(Deserialize)]
pub struct ListParams {
    pub search: Option<String>,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct ExchangeBlock {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: f64,
    pub total_value_converted: f64,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct InventoryResponse {
    pub cards: Vec<OwnedCard>,
    pub count: usize,
    /// Sum of `market_price * quantity` in the stored currency.
    pub total_value: f64,
    /// Absent when no rate could be produced from any tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<ExchangeBlock>,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct CardMutationResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<OwnedCard>,
}

fn first_image(card: &CatalogCard) -> (String, String) {
    match card.images.first() {
        Some(image) => {
            let small = if image.image_url_small.is_empty() {
                image.image_url.clone()
            } else {
                image.image_url_small.clone()
            };
            (image.image_url.clone(), small)
        }
        None => (String::new(), String::new()),
    }
}

/// Refresh a row in place from its catalog entry: backfill missing images
/// and re-resolve prices older than the configured maximum age. Write
/// failures are logged and the stale value is served.
async fn reconcile_row(state: &AppState, row: &mut OwnedCard, info: Option<&CatalogCard>) {
    let Some(info) = info else { return };

    if row.image_url.is_empty() || row.image_url_small.is_empty() {
        let (large, small) = first_image(info);
        if !large.is_empty() {
            if row.image_url.is_empty() {
                row.image_url = large;
            }
            if row.image_url_small.is_empty() {
                row.image_url_small = small;
            }
            if let Err(e) =
                cards::update_images(&state.db_pool, row.id, &row.image_url, &row.image_url_small)
                    .await
            {
                warn!(card_id = row.id, error = ?e, "image backfill failed");
            }
        }
    }

    let age = Utc::now().signed_duration_since(row.price_updated_at);
    if age > state.price_max_age {
        // An unresolvable price keeps the previous stored value; "unknown"
        // is never written back as zero.
        if let Some(price) = resolve_price(info, &row.set_code) {
            match cards::update_price(&state.db_pool, row.id, price).await {
                Ok(()) => {
                    row.market_price = price;
                    row.price_updated_at = Utc::now();
                }
                Err(e) => warn!(card_id = row.id, error = ?e, "price refresh failed"),
            }
        } else {
            debug!(card_id = row.id, set_code = %row.set_code, "no resolvable price");
        }
    }
}

/// `GET /api/cards` -- the public inventory view.
pub async fn list_cards(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let mut rows = cards::list(&state.db_pool, params.search.as_deref())
        .await
        .map_err(|e| db_error("Inventory listing", e))?;

    let mut ids: Vec<i64> = rows.iter().map(|r| r.catalog_id).collect();
    ids.sort_unstable();
    ids.dedup();
    let infos: HashMap<i64, CatalogCard> = catalog::get_by_ids(&state.db_pool, &ids)
        .await
        .map_err(|e| db_error("Catalog lookup", e))?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();

    for row in &mut rows {
        reconcile_row(&state, row, infos.get(&row.catalog_id)).await;
    }

    let total_value: f64 = rows.iter().map(|r| r.market_price * r.quantity as f64).sum();

    let exchange = match state.rates.get().await {
        Ok(rate) => Some(ExchangeBlock {
            from_currency: state.from_currency.clone(),
            to_currency: state.to_currency.clone(),
            rate,
            total_value_converted: total_value * rate,
        }),
        Err(e) => {
            warn!(error = %e, "exchange rate unavailable");
            None
        }
    };

    let count = rows.len();
    Ok(with_cache_control(
        InventoryResponse {
            cards: rows,
            count,
            total_value,
            exchange,
        },
        cache::INVENTORY,
    ))
}

fn default_quantity() -> i32 {
    1
}

#[derive(Deserialize, TS)]
#[ts(export)]
pub struct AddCardRequest {
    #[ts(type = "number")]
    pub catalog_id: i64,
    pub name: String,
    pub set_code: String,
    pub set_rarity: String,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

/// `POST /api/cards`
///
/// Adding an already-owned printing merges into the existing row by
/// incrementing its quantity instead of creating a duplicate.
pub async fn add_card(
    _user: AuthUser,
    State(state): State<AppState>,
    Json(request): Json<AddCardRequest>,
) -> Result<Response, ApiError> {
    if request.name.is_empty() || request.set_code.is_empty() || request.set_rarity.is_empty() {
        return Err(ApiError::invalid(
            "Missing required fields: name, set_code, set_rarity",
        ));
    }
    if request.quantity < 1 {
        return Err(ApiError::invalid("Quantity must be at least 1"));
    }

    let info = catalog::get_by_id(&state.db_pool, request.catalog_id)
        .await
        .map_err(|e| db_error("Catalog lookup", e))?;

    if let Some(existing) = cards::find_by_printing(&state.db_pool, request.catalog_id, &request.set_code)
        .await
        .map_err(|e| db_error("Inventory lookup", e))?
    {
        let mut updated = cards::add_quantity(&state.db_pool, existing.id, request.quantity)
            .await
            .map_err(|e| db_error("Quantity update", e))?
            .ok_or_else(|| ApiError::not_found("Card not found"))?;
        reconcile_row(&state, &mut updated, info.as_ref()).await;
        return Ok(Json(CardMutationResponse {
            message: "Card quantity updated".to_owned(),
            card: Some(updated),
        })
        .into_response());
    }

    let (image_url, image_url_small) = info.as_ref().map(first_image).unwrap_or_default();
    // 0 is the "never priced" column default, not a resolved price.
    let market_price = info
        .as_ref()
        .and_then(|card| resolve_price(card, &request.set_code))
        .unwrap_or(0.0);

    let card = cards::insert(
        &state.db_pool,
        request.catalog_id,
        &request.name,
        &request.set_code,
        &request.set_rarity,
        request.quantity,
        market_price,
        &image_url,
        &image_url_small,
    )
    .await
    .map_err(|e| db_error("Card insertion", e))?;

    Ok((
        StatusCode::CREATED,
        Json(CardMutationResponse {
            message: "Card added successfully".to_owned(),
            card: Some(card),
        }),
    )
        .into_response())
}

#[derive(Deserialize, TS)]
#[ts(export)]
pub struct SetQuantityRequest {
    pub quantity: i32,
}

/// `PATCH /api/cards/{id}` -- set quantity; zero or below deletes the row.
pub async fn set_quantity(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(request): Json<SetQuantityRequest>,
) -> Result<Json<CardMutationResponse>, ApiError> {
    if request.quantity <= 0 {
        let deleted = cards::delete(&state.db_pool, id)
            .await
            .map_err(|e| db_error("Card deletion", e))?;
        if !deleted {
            return Err(ApiError::not_found("Card not found"));
        }
        return Ok(Json(CardMutationResponse {
            message: "Card removed (quantity reached 0)".to_owned(),
            card: None,
        }));
    }

    let card = cards::set_quantity(&state.db_pool, id, request.quantity)
        .await
        .map_err(|e| db_error("Quantity update", e))?
        .ok_or_else(|| ApiError::not_found("Card not found"))?;
    Ok(Json(CardMutationResponse {
        message: "Card updated".to_owned(),
        card: Some(card),
    }))
}

/// `POST /api/cards/{id}/increment`
pub async fn increment(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<CardMutationResponse>, ApiError> {
    let card = cards::add_quantity(&state.db_pool, id, 1)
        .await
        .map_err(|e| db_error("Quantity update", e))?
        .ok_or_else(|| ApiError::not_found("Card not found"))?;
    Ok(Json(CardMutationResponse {
        message: "Card quantity incremented".to_owned(),
        card: Some(card),
    }))
}

/// `POST /api/cards/{id}/decrement` -- deletes the row at zero.
pub async fn decrement(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<CardMutationResponse>, ApiError> {
    let card = cards::add_quantity(&state.db_pool, id, -1)
        .await
        .map_err(|e| db_error("Quantity update", e))?
        .ok_or_else(|| ApiError::not_found("Card not found"))?;

    if card.quantity <= 0 {
        cards::delete(&state.db_pool, id)
            .await
            .map_err(|e| db_error("Card deletion", e))?;
        return Ok(Json(CardMutationResponse {
            message: "Card removed (quantity reached 0)".to_owned(),
            card: None,
        }));
    }

    Ok(Json(CardMutationResponse {
        message: "Card quantity decremented".to_owned(),
        card: Some(card),
    }))
}

/// `DELETE /api/cards/{id}`
pub async fn delete_card(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<CardMutationResponse>, ApiError> {
    let deleted = cards::delete(&state.db_pool, id)
        .await
        .map_err(|e| db_error("Card deletion", e))?;
    if !deleted {
        return Err(ApiError::not_found("Card not found"));
    }
    Ok(Json(CardMutationResponse {
        message: "Card deleted successfully".to_owned(),
        card: None,
    }))
}
