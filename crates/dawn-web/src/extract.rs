//! Small request extractors shared by the gateway and WebSocket handlers.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;

/// The peer address as a string, resolved in order of preference from the
/// `X-Forwarded-For` header (first hop) and the socket's connect info.
///
/// Rate limiting normalizes this further (IPv6 /64); here we only capture
/// what the transport tells us.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl ClientIp {
    #[must_use]
    pub fn from_parts(headers: &HeaderMap, connect: Option<SocketAddr>) -> Self {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let ip = forwarded
            .or_else(|| connect.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Self(ip)
    }
}

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let connect = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::from_parts(&parts.headers, connect))
    }
}

/// Extract the value of one cookie from a `Cookie` header.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for pair in header.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some(name) {
            return parts.next().map(ToString::to_string);
        }
    }
    None
}
