//! Denial taxonomy and its HTTP rendering.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::security::rate_limit::RateDecision;
use crate::security::validation::{Violation, ViolationKind};

/// Why the gate refused a request.
#[derive(Debug, Clone, Error)]
pub enum GateError {
    #[error("Rate limit exceeded")]
    RateLimitExceeded { reset_at: u64, banned: bool },

    /// No credential was offered.
    #[error("Authentication required")]
    AuthenticationRequired { reason: String },

    /// Credentials were offered and none verified.
    #[error("Authentication failed")]
    AuthenticationFailed { reason: String },

    #[error("Input validation failed")]
    ValidationFailed(Vec<Violation>),

    /// Anything unexpected. The detail never reaches clients outside debug mode.
    #[error("Internal security error")]
    Internal(String),
}

/// JSON body of every denial.
#[derive(Debug, Serialize)]
pub struct DenialBody {
    pub error: String,
    #[serde(rename = "resetTime", skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GateError::AuthenticationRequired { .. } | GateError::AuthenticationFailed { .. } => {
                StatusCode::UNAUTHORIZED
            }
            GateError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable label for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            GateError::RateLimitExceeded { banned: true, .. } => "banned",
            GateError::RateLimitExceeded { .. } => "rate_limited",
            GateError::AuthenticationRequired { .. } => "authentication_required",
            GateError::AuthenticationFailed { .. } => "authentication_failed",
            GateError::ValidationFailed(violations) => match violations.first().map(|v| &v.kind) {
                Some(ViolationKind::SqlInjection) => "sql_injection",
                Some(ViolationKind::Xss) => "xss",
                Some(ViolationKind::NoSqlInjection) => "nosql_injection",
                Some(ViolationKind::BodyTooLarge { .. }) => "body_too_large",
                Some(ViolationKind::FileRejected(_)) => "file_rejected",
                Some(ViolationKind::MalformedBody) | Some(ViolationKind::Schema(_)) | None => {
                    "invalid_body"
                }
            },
            GateError::Internal(_) => "internal",
        }
    }

    /// Validation details are always returned; auth reasons and internal
    /// detail only in debug mode.
    pub fn body(&self, debug: bool) -> DenialBody {
        let (reset_time, details) = match self {
            GateError::RateLimitExceeded { reset_at, .. } => (Some(*reset_at), None),
            GateError::AuthenticationRequired { reason } | GateError::AuthenticationFailed { reason } => {
                (None, debug.then(|| vec![reason.clone()]))
            }
            GateError::ValidationFailed(violations) => {
                (None, Some(violations.iter().map(|v| v.to_string()).collect()))
            }
            GateError::Internal(detail) => (None, debug.then(|| vec![detail.clone()])),
        };
        DenialBody {
            error: self.to_string(),
            reset_time,
            details,
        }
    }

    pub fn into_response(self, debug: bool) -> Response<Body> {
        json_response(self.status(), &self.body(debug))
    }
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let bytes = serde_json::to_vec(body).unwrap_or_else(|_| b"{\"error\":\"Internal security error\"}".to_vec());
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// X-RateLimit-* on every response that went through the limiter; Retry-After
/// additionally on 429s.
pub fn stamp_rate_headers(headers: &mut HeaderMap, decision: &RateDecision, denied: bool) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_at));
    if denied {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(decision.retry_after_secs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statuses() {
        assert_eq!(
            GateError::RateLimitExceeded { reset_at: 1, banned: false }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GateError::AuthenticationFailed { reason: "x".into() }.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(GateError::ValidationFailed(vec![]).status(), StatusCode::BAD_REQUEST);
        assert_eq!(GateError::Internal("boom".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_internal_detail_hidden_outside_debug() {
        let err = GateError::Internal("session store timed out".into());

        let body = serde_json::to_value(err.body(false)).unwrap();
        assert_eq!(body, serde_json::json!({"error": "Internal security error"}));

        let body = serde_json::to_value(err.body(true)).unwrap();
        assert_eq!(body["details"][0], "session store timed out");
    }

    #[test]
    fn test_validation_details_always_listed() {
        let err = GateError::ValidationFailed(vec![
            Violation::new(ViolationKind::SqlInjection, "q"),
            Violation::new(ViolationKind::Xss, "bio"),
        ]);
        assert_eq!(err.reason(), "sql_injection");

        let body = serde_json::to_value(err.body(false)).unwrap();
        assert_eq!(body["error"], "Input validation failed");
        assert_eq!(body["details"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_rate_limit_body_carries_reset_time() {
        let body = serde_json::to_value(
            GateError::RateLimitExceeded { reset_at: 1_700_000_000_000, banned: false }.body(false),
        )
        .unwrap();
        assert_eq!(body["resetTime"], 1_700_000_000_000u64);
        assert!(body.get("details").is_none());
    }
}
