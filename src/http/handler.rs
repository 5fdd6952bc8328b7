//! Business handler seam.
//!
//! Admitted requests are handed to a [`RequestHandler`] with the
//! [`AuthOutcome`] attached as an extension.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use serde::Serialize;

use crate::gateway::error::json_response;
use crate::security::auth::{AuthMethod, AuthOutcome};

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Request<Body>) -> Response;
}

/// Built-in handler used when no upstream is configured: acknowledges the
/// admission and reports who the gate thinks the caller is.
#[derive(Debug, Clone, Copy, Default)]
pub struct AckHandler;

#[derive(Debug, Serialize)]
struct Ack<'a> {
    status: &'static str,
    method: &'a str,
    path: &'a str,
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_method: Option<AuthMethod>,
}

#[async_trait]
impl RequestHandler for AckHandler {
    async fn handle(&self, request: Request<Body>) -> Response {
        let auth = request.extensions().get::<AuthOutcome>();
        let ack = Ack {
            status: "admitted",
            method: request.method().as_str(),
            path: request.uri().path(),
            authenticated: auth.is_some_and(|a| a.authenticated),
            subject: auth.and_then(|a| a.subject_id.as_deref()),
            auth_method: auth.and_then(|a| a.method),
        };
        json_response(StatusCode::OK, &ack)
    }
}
