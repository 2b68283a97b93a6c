//! Catalog search against the locally mirrored card database.

use axum::extract::{Query, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::catalog::CatalogCard;
use crate::state::AppState;
use crate::web::error::{ApiError, db_error};
use crate::web::routes::{cache, with_cache_control};

const SEARCH_LIMIT: i64 = 50;

#[derive(Deserialize)]
pub struct SearchParams {
    pub name: Option<String>,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct CatalogSearchResponse {
    pub cards: Vec<CatalogCard>,
    pub count: usize,
}

/// `GET /api/catalog/search?name=...`
///
/// Substring match over the mirror, never the upstream API.
pub async fn search_catalog(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let name = params.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(ApiError::invalid("Query parameter 'name' is required"));
    }

    let cards = crate::data::catalog::search_by_name(&state.db_pool, name, SEARCH_LIMIT)
        .await
        .map_err(|e| db_error("Catalog search", e))?;

    let count = cards.len();
    Ok(with_cache_control(
        CatalogSearchResponse { cards, count },
        cache::CATALOG_SEARCH,
    ))
}
