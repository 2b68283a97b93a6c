//! Web API router construction and shared response utilities.

use axum::http::HeaderValue;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch, post};
use axum::Router;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::state::AppState;
use crate::web::middleware::request_id;
use crate::web::{auth, cards, catalog, list, profile, status};

/// Cache-Control presets for public endpoints.
pub mod cache {
    /// Inventory listing; prices move at most daily but quantities are live.
    pub const INVENTORY: &str = "public, max-age=30, stale-while-revalidate=60";
    /// Catalog search against the 7-day mirror.
    pub const CATALOG_SEARCH: &str = "public, max-age=300, stale-while-revalidate=300";
    /// Profile panel; backed by the hourly in-memory cache.
    pub const PROFILE: &str = "public, max-age=300, stale-while-revalidate=300";
    /// One-shot responses -- never cache.
    pub const NONE: &str = "no-store";
}

/// Wraps a JSON response with a `Cache-Control` header.
pub fn with_cache_control<T: serde::Serialize>(value: T, header: &'static str) -> Response {
    let mut response = Json(value).into_response();
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static(header),
    );
    response
}

/// Creates the web server router
pub fn create_router(app_state: AppState, frontend_origin: Option<&str>) -> Router {
    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/cards", get(cards::list_cards).post(cards::add_card))
        .route(
            "/cards/{id}",
            patch(cards::set_quantity).delete(cards::delete_card),
        )
        .route("/cards/{id}/increment", post(cards::increment))
        .route("/cards/{id}/decrement", post(cards::decrement))
        .route("/catalog/search", get(catalog::search_catalog))
        .route("/profile", get(profile::get_profile))
        .route("/profile/changed", get(profile::profile_changed))
        .route("/auth/login", post(auth::login))
        .route("/auth/verify", get(auth::verify))
        .route("/auth/logout", post(auth::logout))
        .route("/list/resolve", post(list::resolve_list))
        .route("/list/export", post(list::export_list))
        .route("/list/apply", post(list::apply_list))
        .with_state(app_state);

    // Exact origin in production, permissive for local development.
    let cors = match frontend_origin.and_then(|o| o.parse::<HeaderValue>().ok()) {
        Some(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_methods(Any)
            .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE]),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE]),
    };

    Router::new().nest("/api", api_router).layer((
        // Outermost: per-request ID span + severity-proportional response logging.
        axum::middleware::from_fn(request_id::track),
        cors,
        CompressionLayer::new(),
        TimeoutLayer::new(Duration::from_secs(60)),
    ))
}
