use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};
use axum::async_trait;
use std::convert::Infallible;
use std::net::SocketAddr;

use super::state::AppState;

pub const UNKNOWN_IP: &str = "unknown";

/// Headers that may carry the real client address, most trusted first.
pub const FORWARDED_IP_HEADERS: [&str; 4] = [
    "x-nf-client-connection-ip",
    "x-forwarded-for",
    "x-real-ip",
    "cf-connecting-ip",
];

pub fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

// Proxies append to these headers, the client is the first entry.
fn header_ip(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// The address access decisions are made on: the edge proxy's header when
/// one is configured and present, otherwise the socket peer. An empty header
/// name means no proxy is trusted.
pub fn restriction_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_header: Option<&str>,
) -> String {
    trusted_header
        .filter(|name| !name.is_empty())
        .and_then(|name| header_ip(headers, name))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

/// Best guess at the caller's address from every header a proxy might set.
pub fn detect_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    FORWARDED_IP_HEADERS
        .iter()
        .find_map(|name| header_ip(headers, name))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

/// Extractor for [`restriction_ip`] using the configured trusted header.
pub struct ClientIp(pub String);

#[async_trait]
impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(restriction_ip(
            &parts.headers,
            peer_addr(&parts.extensions),
            state.config.client_ip_header.as_deref(),
        )))
    }
}
