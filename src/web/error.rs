//! API error responses.

use crate::cache::CacheError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;
use tracing::error;
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ApiErrorCode {
    InvalidRequest,
    Unauthorized,
    NotFound,
    RateLimited,
    Unavailable,
    Internal,
}

#[derive(Debug)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::InvalidRequest, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(ApiErrorCode::Unauthorized, "Invalid or missing credentials")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::NotFound, message)
    }

    pub fn rate_limited() -> Self {
        Self::new(
            ApiErrorCode::RateLimited,
            "Too many attempts. Try again later.",
        )
    }

    fn status(&self) -> StatusCode {
        match self.code {
            ApiErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ApiErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.message, "code": self.code });
        (self.status(), Json(body)).into_response()
    }
}

/// Data that could not be produced from any cache tier or upstream. Callers
/// get an explicit "unavailable", never a fabricated value.
impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        let CacheError::NoData { source } = err;
        Self::new(
            ApiErrorCode::Unavailable,
            format!("{source} data is currently unavailable"),
        )
    }
}

/// Log a storage failure with context; the client sees only a generic error.
pub fn db_error(context: &str, err: anyhow::Error) -> ApiError {
    error!(error = ?err, "{context}");
    ApiError::new(ApiErrorCode::Internal, format!("{context} failed"))
}
