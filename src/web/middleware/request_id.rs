//! Request-ID propagation and per-request log spans.
//!
//! Honors an inbound `X-Request-Id` from the edge proxy so logs correlate
//! with its dashboard, minting a ULID otherwise. The resolved ID is echoed
//! on the response, and each response is logged at a severity matching its
//! status class.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::Instrument;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn track(req: Request, next: Next) -> Response {
    let req_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| ulid::Ulid::new().to_string());

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let started = Instant::now();
    let span = tracing::info_span!("request", req_id = %req_id);

    let mut response = next.run(req).instrument(span).await;

    let status = response.status().as_u16();
    let duration_ms = started.elapsed().as_millis() as u64;
    match status {
        500.. => tracing::warn!(%method, path, status, duration_ms, "request completed"),
        400.. => tracing::info!(%method, path, status, duration_ms, "request completed"),
        _ => tracing::debug!(%method, path, status, duration_ms, "request completed"),
    }

    if let Ok(value) = HeaderValue::from_str(&req_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
