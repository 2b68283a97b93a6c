//! Client IP resolution, used to key the login rate limiter.

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::StatusCode;
use http::request::Parts;
use std::net::{IpAddr, SocketAddr};

/// The caller's IP: the rightmost `X-Forwarded-For` entry when the edge
/// proxy supplies one, otherwise the raw socket peer.
pub struct ClientIp(pub IpAddr);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|xff| xff.rsplit(',').next())
            .and_then(|last| last.trim().parse::<IpAddr>().ok());

        if let Some(ip) = forwarded {
            return Ok(ClientIp(ip));
        }

        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| ClientIp(addr.ip()))
            .ok_or((
                StatusCode::INTERNAL_SERVER_ERROR,
                "client address unavailable",
            ))
    }
}
