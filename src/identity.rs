//! Client identity extraction.
//!
//! The identity decides which counter a request is charged to. Anonymous
//! traffic is keyed by network address; the per-user bucket is keyed by the
//! id the upstream authentication middleware attached to the request.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};

/// Identity used when nothing about the peer is known.
pub const UNKNOWN_IDENTITY: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// An authenticated caller, inserted into request extensions by the
/// authentication layer in front of the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
}

impl AuthenticatedUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Derive the network identity of a request.
///
/// Precedence: first hop of `x-forwarded-for`, then `x-real-ip`, then the
/// socket peer address, then [`UNKNOWN_IDENTITY`].
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(hop) = header_str(headers, FORWARDED_FOR)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
    {
        return hop.to_string();
    }

    if let Some(ip) = header_str(headers, REAL_IP).map(str::trim).filter(|ip| !ip.is_empty()) {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}

/// [`client_identity`] for an axum request, reading the peer from
/// `ConnectInfo` when the server was started with connect info.
pub fn request_identity<B>(request: &Request<B>) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    client_identity(request.headers(), peer)
}

/// Id of the authenticated caller, if any.
pub fn authenticated_user<B>(request: &Request<B>) -> Option<&str> {
    request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|user| user.id.as_str())
        .filter(|id| !id.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
