//! Client address and user-agent extraction.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use gatekeeper_core::network::{resolve_client, ForwardingHeaders, UNKNOWN_ADDRESS};

use crate::state::AppState;

/// Where a request came from.
///
/// The socket peer is the client unless it is one of the configured
/// trusted proxies, in which case `X-Forwarded-For` (then `X-Real-IP`) is
/// consulted; see [`resolve_client`]. Never rejects; an undeterminable
/// address becomes `"unknown"`.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub ip: String,
    pub user_agent: Option<String>,
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

impl FromRequestParts<AppState> for ClientContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let headers = ForwardingHeaders {
            forwarded_for: header(parts, "x-forwarded-for"),
            real_ip: header(parts, "x-real-ip"),
        };

        let ip = resolve_client(peer, headers, &state.config.trusted_proxies)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());

        let user_agent = header(parts, USER_AGENT.as_str())
            .map(str::to_string)
            .filter(|ua| !ua.is_empty());

        Ok(Self { ip, user_agent })
    }
}
