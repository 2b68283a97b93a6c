//! GitHub profile endpoints backed by the in-memory profile cache.

use axum::extract::State;
use axum::response::Response;
use serde_json::json;

use crate::state::AppState;
use crate::web::error::ApiError;
use crate::web::routes::{cache, with_cache_control};

/// `GET /api/profile`
pub async fn get_profile(State(state): State<AppState>) -> Result<Response, ApiError> {
    let profile = state.profile.get().await?;
    Ok(with_cache_control(profile.as_ref(), cache::PROFILE))
}

/// `GET /api/profile/changed`
///
/// Reading the flag consumes it: a `true` response will not repeat until
/// the poller observes another content change.
pub async fn profile_changed(State(state): State<AppState>) -> Response {
    let changed = state.profile.consume_change_flag();
    with_cache_control(json!({ "changed": changed }), cache::NONE)
}
