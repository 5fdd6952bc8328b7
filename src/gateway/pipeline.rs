//! The admission state machine.
//!
//! # Responsibilities
//! - Run CORS, rate limiting, authentication and body validation in order
//! - Stop at the first denial and render it
//! - Hand admitted requests to the caller-supplied forwarder
//! - Decorate every outgoing response
//!
//! # Design Decisions
//! - The security bundle lives behind an `ArcSwap`; a request loads one
//!   snapshot and uses it for its whole traversal, so a reload never mixes
//!   two configurations within one request
//! - The rate limiter is shared across reloads; windows and bans survive
//! - Only a failing session store produces an internal error; everything
//!   else is a typed denial

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, Response};
use serde_json::Value;

use crate::config::SecurityConfig;
use crate::gateway::error::{stamp_rate_headers, GateError};
use crate::gateway::outcome::{Admitted, Denial, PipelineResult, Stage};
use crate::observability::metrics;
use crate::security::auth::{AuthConfigError, AuthOutcome, Authenticator};
use crate::security::cors::{request_origin, CorsPolicy};
use crate::security::headers::{apply_security_headers, client_identifier};
use crate::security::rate_limit::{RateDecision, RateLimiter};
use crate::security::session::SessionStore;
use crate::security::validation::{validate_body, SchemaValidator, Violation, ViolationKind};

/// Everything derived from one [`SecurityConfig`].
pub struct GateSnapshot {
    pub config: SecurityConfig,
    pub authenticator: Authenticator,
    pub cors: CorsPolicy,
}

impl GateSnapshot {
    fn build(
        config: SecurityConfig,
        sessions: Option<Arc<dyn SessionStore>>,
    ) -> Result<Self, AuthConfigError> {
        Ok(Self {
            authenticator: Authenticator::from_config(&config.authentication, sessions)?,
            cors: CorsPolicy::from_config(&config.cors),
            config,
        })
    }
}

pub struct Gateway {
    snapshot: ArcSwap<GateSnapshot>,
    limiter: Arc<RateLimiter>,
    sessions: Option<Arc<dyn SessionStore>>,
    schema: Option<Arc<dyn SchemaValidator>>,
}

/// Builder for [`Gateway`].
pub struct GatewayBuilder {
    config: SecurityConfig,
    limiter: Option<Arc<RateLimiter>>,
    sessions: Option<Arc<dyn SessionStore>>,
    schema: Option<Arc<dyn SchemaValidator>>,
}

impl GatewayBuilder {
    /// Share an existing limiter (and its sweeper) instead of a fresh one.
    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn schema_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.schema = Some(validator);
        self
    }

    pub fn build(self) -> Result<Gateway, AuthConfigError> {
        let snapshot = GateSnapshot::build(self.config, self.sessions.clone())?;
        Ok(Gateway {
            snapshot: ArcSwap::from_pointee(snapshot),
            limiter: self.limiter.unwrap_or_default(),
            sessions: self.sessions,
            schema: self.schema,
        })
    }
}

impl Gateway {
    pub fn builder(config: SecurityConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            limiter: None,
            sessions: None,
            schema: None,
        }
    }

    /// Gateway with a private limiter and no collaborators.
    pub fn new(config: SecurityConfig) -> Result<Self, AuthConfigError> {
        Self::builder(config).build()
    }

    /// Swap in a new security bundle. In-flight requests finish on the old one.
    pub fn reload(&self, config: SecurityConfig) -> Result<(), AuthConfigError> {
        let snapshot = GateSnapshot::build(config, self.sessions.clone())?;
        self.snapshot.store(Arc::new(snapshot));
        tracing::info!("Security configuration reloaded");
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<GateSnapshot> {
        self.snapshot.load_full()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Run the gate without forwarding or decorating.
    pub async fn admit(&self, request: Request<Body>, peer: Option<IpAddr>) -> PipelineResult {
        let snapshot = self.snapshot.load_full();
        self.traverse(&snapshot, request, peer).await
    }

    /// Run the gate, forward admitted requests and decorate the response.
    pub async fn process<F, Fut>(&self, request: Request<Body>, peer: Option<IpAddr>, forward: F) -> Response<Body>
    where
        F: FnOnce(Request<Body>) -> Fut,
        Fut: Future<Output = Response<Body>>,
    {
        let start = Instant::now();
        let snapshot = self.snapshot.load_full();
        let origin = request_origin(request.headers()).map(str::to_owned);
        let method = request.method().clone();
        let path = request.uri().path().to_owned();

        let mut response = match self.traverse(&snapshot, request, peer).await {
            PipelineResult::Preflight(response) => {
                metrics::record_request("preflight", start);
                response
            }
            PipelineResult::Forward(admitted) => {
                let mut response = forward(admitted.request).await;
                if let Some(decision) = &admitted.rate {
                    stamp_rate_headers(response.headers_mut(), decision, false);
                }
                snapshot.cors.decorate(response.headers_mut(), origin.as_deref());
                tracing::debug!(
                    client = %admitted.client,
                    method = %method,
                    path = %path,
                    status = %response.status(),
                    subject = ?admitted.auth.subject_id,
                    "Request forwarded"
                );
                metrics::record_request("forwarded", start);
                response
            }
            PipelineResult::Denied(denial) => {
                let reason = denial.error.reason();
                match &denial.error {
                    GateError::Internal(detail) => tracing::error!(
                        client = %denial.client,
                        stage = %denial.stage,
                        detail = %detail,
                        "Internal security error"
                    ),
                    error => tracing::warn!(
                        client = %denial.client,
                        stage = %denial.stage,
                        reason,
                        method = %method,
                        path = %path,
                        error = %error,
                        "Request denied"
                    ),
                }
                metrics::record_denial(reason);
                metrics::record_request("denied", start);

                let mut response = denial.into_response(snapshot.config.debug);
                snapshot.cors.decorate(response.headers_mut(), origin.as_deref());
                response
            }
        };

        if snapshot.config.headers.enabled {
            apply_security_headers(response.headers_mut());
        }
        response
    }

    async fn traverse(&self, snapshot: &GateSnapshot, request: Request<Body>, peer: Option<IpAddr>) -> PipelineResult {
        let config = &snapshot.config;
        let client = client_identifier(request.headers(), peer, &config.trusted_proxies);

        // Start → CorsChecked
        if let Some(response) = snapshot.cors.handle_preflight(request.method(), request.headers()) {
            return PipelineResult::Preflight(response);
        }

        // CorsChecked → RateChecked
        let mut rate: Option<RateDecision> = None;
        if config.rate_limit.enabled {
            let decision = self.limiter.check(&client, &config.rate_limit);
            if !decision.allowed {
                return deny(
                    Stage::RateChecked,
                    GateError::RateLimitExceeded {
                        reset_at: decision.reset_at,
                        banned: decision.banned,
                    },
                    Some(decision),
                    client,
                );
            }
            rate = Some(decision);
        }

        // RateChecked → AuthChecked
        let auth_config = &config.authentication;
        let auth = if auth_config.required && !path_is_anonymous(request.uri().path(), &auth_config.allow_anonymous) {
            match snapshot.authenticator.authenticate(request.headers()).await {
                Ok(outcome) if outcome.authenticated => outcome,
                Ok(outcome) => {
                    let reason = outcome
                        .reason
                        .unwrap_or_else(|| "No valid authentication method found".to_string());
                    let error = if outcome.credentials_presented {
                        GateError::AuthenticationFailed { reason }
                    } else {
                        GateError::AuthenticationRequired { reason }
                    };
                    return deny(Stage::AuthChecked, error, rate, client);
                }
                Err(e) => return deny(Stage::AuthChecked, GateError::Internal(e.to_string()), rate, client),
            }
        } else {
            AuthOutcome::anonymous()
        };

        // AuthChecked → Validated
        let mut request = request;
        let kind = body_kind(request.headers());
        if carries_body(request.method()) && kind != BodyKind::Other {
            let (parts, body) = request.into_parts();
            let bytes = match read_body(body, config.validation.max_body_size).await {
                Ok(bytes) => bytes,
                Err(violation) => {
                    return deny(Stage::Validated, GateError::ValidationFailed(vec![violation]), rate, client);
                }
            };

            if !bytes.is_empty() {
                let violations = match (serde_json::from_slice::<Value>(&bytes), kind) {
                    (Ok(value), _) => self.inspect(&value, parts.uri.path(), config),
                    (Err(_), BodyKind::Json) => vec![Violation::new(ViolationKind::MalformedBody, "")],
                    // Untyped and not JSON: nothing to inspect.
                    (Err(_), _) => Vec::new(),
                };
                if !violations.is_empty() {
                    return deny(Stage::Validated, GateError::ValidationFailed(violations), rate, client);
                }
            }
            request = Request::from_parts(parts, Body::from(bytes));
        }

        // Validated → Forwarded
        request.extensions_mut().insert(auth.clone());
        PipelineResult::Forward(Admitted {
            request,
            auth,
            rate,
            client,
        })
    }

    fn inspect(&self, value: &Value, path: &str, config: &SecurityConfig) -> Vec<Violation> {
        let mut violations = validate_body(value, &config.validation).errors;
        if let Some(schema) = &self.schema {
            violations.extend(
                schema
                    .validate(path, value)
                    .into_iter()
                    .map(|(at, message)| Violation::new(ViolationKind::Schema(message), at)),
            );
        }
        violations
    }
}

fn deny(stage: Stage, error: GateError, rate: Option<RateDecision>, client: String) -> PipelineResult {
    PipelineResult::Denied(Denial {
        stage,
        error,
        rate,
        client,
    })
}

/// Exact match, or the entry is a prefix ending at a path segment boundary.
fn path_is_anonymous(path: &str, allow_anonymous: &[String]) -> bool {
    allow_anonymous.iter().any(|allowed| {
        let allowed = allowed.trim_end_matches('/');
        path == allowed
            || path
                .strip_prefix(allowed)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// How a body is treated by validation, judged by its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    /// Declared JSON; must parse.
    Json,
    /// No content type; inspected only if it happens to parse as JSON.
    Untyped,
    Other,
}

fn body_kind(headers: &HeaderMap) -> BodyKind {
    let Some(content_type) = headers.get(header::CONTENT_TYPE) else {
        return BodyKind::Untyped;
    };
    let essence = content_type
        .to_str()
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if essence == "application/json" || essence.ends_with("+json") {
        BodyKind::Json
    } else {
        BodyKind::Other
    }
}

/// Buffer the body. Raw input may carry whitespace the compact size check
/// ignores, so the read itself allows twice the configured limit.
async fn read_body(body: Body, max_body_size: usize) -> Result<Bytes, Violation> {
    axum::body::to_bytes(body, max_body_size.saturating_mul(2))
        .await
        .map_err(|_| Violation::new(ViolationKind::BodyTooLarge { limit: max_body_size }, ""))
}
