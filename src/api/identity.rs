//! Caller identity for rate limiting.
//!
//! The identity is the first `x-forwarded-for` hop when present (the service
//! usually sits behind a proxy), else the peer address from `ConnectInfo`.
//! A request with neither has no identity and is not metered.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Header carrying the shared secret.
pub const FAMILY_CODE_HEADER: &str = "x-family-code";

/// Extractor for the caller's source address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub Option<String>);

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = forwarded_for(&parts.headers);
        let peer = || {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        };
        Ok(Self(forwarded.or_else(peer)))
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Shared secret sent by the caller, if any.
pub fn family_code(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FAMILY_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}
