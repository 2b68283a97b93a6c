//! Bearer-token authentication: login/verify/logout handlers, a read-through
//! session cache, and the extractor protecting the edit surface.

use crate::data::users::{PublicUser, User};
use crate::data::{sessions, users};
use crate::state::AppState;
use crate::web::error::{ApiError, db_error};
use crate::web::middleware::client_ip::ClientIp;
use axum::extract::{FromRequestParts, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::Json;
use chrono::Utc;
use dashmap::DashMap;
use http::request::Parts;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use ts_rs::TS;

/// How long a positive session lookup is held in memory before the database
/// is consulted again. Short: revocation must propagate quickly.
const SESSION_CACHE_TTL: Duration = Duration::from_secs(60);

/// Read-through cache over the `sessions` table.
#[derive(Clone)]
pub struct SessionCache {
    pool: PgPool,
    entries: Arc<DashMap<String, (Instant, User)>>,
}

impl SessionCache {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Resolve a bearer token to its user, hitting the database only when the
    /// memory entry is absent or older than [`SESSION_CACHE_TTL`].
    pub async fn authenticate(&self, token: &str) -> anyhow::Result<Option<User>> {
        if let Some(entry) = self.entries.get(token) {
            let (cached_at, ref user) = *entry;
            if cached_at.elapsed() < SESSION_CACHE_TTL {
                return Ok(Some(user.clone()));
            }
        }

        match sessions::find_user_by_token(&self.pool, token).await? {
            Some(user) => {
                self.entries
                    .insert(token.to_owned(), (Instant::now(), user.clone()));
                Ok(Some(user))
            }
            None => {
                self.entries.remove(token);
                Ok(None)
            }
        }
    }

    pub fn insert(&self, token: &str, user: User) {
        self.entries.insert(token.to_owned(), (Instant::now(), user));
    }

    pub fn revoke(&self, token: &str) {
        self.entries.remove(token);
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extractor for authenticated routes. Rejects with 401 when the bearer
/// token is missing, unknown, or expired.
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            return Err(ApiError::unauthorized());
        };
        match state.session_cache.authenticate(token).await {
            Ok(Some(user)) => Ok(AuthUser(user)),
            Ok(None) => Err(ApiError::unauthorized()),
            Err(e) => Err(db_error("Session lookup", e)),
        }
    }
}

// -- Handlers --

#[derive(Deserialize, TS)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
    pub user: PublicUser,
}

/// `POST /api/auth/login`
///
/// Rate limited per client IP so password guessing stays expensive.
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if state.login_limiter.check_key(&ip).is_err() {
        warn!(%ip, "login rate limit hit");
        return Err(ApiError::rate_limited());
    }

    if request.username.is_empty() || request.password.is_empty() {
        return Err(ApiError::invalid("Username and password are required"));
    }

    let user = users::find_by_username(&state.db_pool, &request.username)
        .await
        .map_err(|e| db_error("User lookup", e))?;

    // Same rejection whether the user is unknown or the password is wrong.
    let Some(user) = user else {
        return Err(ApiError::unauthorized());
    };

    let hash = user.password_hash.clone();
    let password = request.password;
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(&password, &hash))
        .await
        .map_err(|e| db_error("Password verification", e.into()))?
        .unwrap_or(false);
    if !verified {
        return Err(ApiError::unauthorized());
    }

    let token = nanoid::nanoid!(32);
    let expires_at = Utc::now() + state.session_ttl;
    sessions::create(&state.db_pool, &token, user.id, expires_at)
        .await
        .map_err(|e| db_error("Session creation", e))?;
    state.session_cache.insert(&token, user.clone());

    info!(username = %user.username, "login succeeded");
    Ok(Json(LoginResponse {
        token,
        user: PublicUser::from(&user),
    }))
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<PublicUser>,
}

/// `GET /api/auth/verify` -- report whether the presented token is live.
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<VerifyResponse>, ApiError> {
    let Some(token) = bearer_token(&headers) else {
        return Ok(Json(VerifyResponse {
            valid: false,
            user: None,
        }));
    };
    let user = state
        .session_cache
        .authenticate(token)
        .await
        .map_err(|e| db_error("Session lookup", e))?;
    Ok(Json(VerifyResponse {
        valid: user.is_some(),
        user: user.as_ref().map(PublicUser::from),
    }))
}

/// `POST /api/auth/logout` -- revoke the presented token.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(token) = bearer_token(&headers) else {
        return Err(ApiError::unauthorized());
    };
    sessions::delete(&state.db_pool, token)
        .await
        .map_err(|e| db_error("Session deletion", e))?;
    state.session_cache.revoke(token);
    Ok(Json(serde_json::json!({ "message": "Logged out" })))
}
