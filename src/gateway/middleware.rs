//! The gate as an axum middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::gateway::pipeline::Gateway;

/// Mount with `axum::middleware::from_fn_with_state(gateway, gate_middleware)`.
///
/// The peer address comes from `ConnectInfo` when the router is served with
/// `into_make_service_with_connect_info`; without it the client identifier
/// falls back to forwarded headers or `"unknown"`.
pub async fn gate_middleware(
    State(gateway): State<Arc<Gateway>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    gateway.process(request, peer, move |req| next.run(req)).await
}
