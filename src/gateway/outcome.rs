//! Pipeline states and terminal results.

use std::fmt;

use axum::body::Body;
use axum::http::{Request, Response};
use serde::Serialize;

use crate::gateway::error::{stamp_rate_headers, GateError};
use crate::security::auth::AuthOutcome;
use crate::security::rate_limit::RateDecision;

/// Progress of one request through the gate.
///
/// ```text
/// Start → CorsChecked → RateChecked → AuthChecked → Validated → Forwarded
///   └──────────┴─────────────┴─────────────┴────────────┴──→ Denied(stage)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    CorsChecked,
    RateChecked,
    AuthChecked,
    Validated,
    Forwarded,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::CorsChecked => "cors_checked",
            Stage::RateChecked => "rate_checked",
            Stage::AuthChecked => "auth_checked",
            Stage::Validated => "validated",
            Stage::Forwarded => "forwarded",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request that cleared every configured stage.
///
/// The [`AuthOutcome`] is already attached to `request` as an extension.
#[derive(Debug)]
pub struct Admitted {
    pub request: Request<Body>,
    pub auth: AuthOutcome,
    pub rate: Option<RateDecision>,
    pub client: String,
}

/// A refusal. `stage` is the state the request failed to reach.
#[derive(Debug)]
pub struct Denial {
    pub stage: Stage,
    pub error: GateError,
    pub rate: Option<RateDecision>,
    pub client: String,
}

impl Denial {
    /// Status, JSON body and rate-limit headers. CORS and hardening headers
    /// are added by the gateway.
    pub fn into_response(self, debug: bool) -> Response<Body> {
        let rate_denied = matches!(self.error, GateError::RateLimitExceeded { .. });
        let mut response = self.error.into_response(debug);
        if let Some(decision) = &self.rate {
            stamp_rate_headers(response.headers_mut(), decision, rate_denied);
        }
        response
    }
}

/// Terminal artifact of one traversal.
#[derive(Debug)]
pub enum PipelineResult {
    /// CORS preflight answered without touching later stages.
    Preflight(Response<Body>),
    Forward(Admitted),
    Denied(Denial),
}

impl PipelineResult {
    pub fn is_forward(&self) -> bool {
        matches!(self, PipelineResult::Forward(_))
    }
}
