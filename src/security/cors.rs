//! CORS negotiation.
//!
//! Origin mismatches are never errors: the matching headers are simply left
//! off and the browser enforces the policy.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Response, StatusCode};

use crate::config::CorsConfig;

/// Pre-rendered header values for one configuration snapshot.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    enabled: bool,
    any_origin: bool,
    origins: Vec<String>,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    expose_headers: HeaderValue,
    max_age: HeaderValue,
}

impl CorsPolicy {
    pub fn from_config(config: &CorsConfig) -> Self {
        Self {
            enabled: config.enabled,
            any_origin: config.origins.iter().any(|o| o == "*"),
            origins: config.origins.clone(),
            allow_methods: joined(&config.methods),
            allow_headers: joined(&config.allowed_headers),
            expose_headers: joined(&config.exposed_headers),
            max_age: HeaderValue::from(config.max_age_secs),
        }
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.any_origin || self.origins.iter().any(|o| o == origin)
    }

    /// Answer an OPTIONS request. Returns `None` for any other method or when
    /// CORS is disabled.
    pub fn handle_preflight(&self, method: &Method, headers: &HeaderMap) -> Option<Response<Body>> {
        if !self.enabled || method != Method::OPTIONS {
            return None;
        }

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::OK;
        let out = response.headers_mut();

        if let Some(origin) = request_origin(headers) {
            if self.origin_allowed(origin) {
                self.allow_origin(out, origin);
            } else {
                tracing::debug!(origin = %origin, "Preflight from unlisted origin");
            }
        }
        out.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        out.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
        out.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());

        Some(response)
    }

    /// Decorate a non-preflight response.
    pub fn decorate(&self, headers: &mut HeaderMap, origin: Option<&str>) {
        if !self.enabled {
            return;
        }
        if let Some(origin) = origin {
            if self.origin_allowed(origin) {
                self.allow_origin(headers, origin);
            }
        }
        headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, self.expose_headers.clone());
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }

    fn allow_origin(&self, headers: &mut HeaderMap, origin: &str) {
        // Credentials are allowed, so the concrete origin is echoed even for "*".
        if let Ok(value) = HeaderValue::from_str(origin) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }
    }
}

pub fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::ORIGIN).and_then(|v| v.to_str().ok())
}

fn joined(values: &[String]) -> HeaderValue {
    HeaderValue::from_str(&values.join(", ")).unwrap_or_else(|_| HeaderValue::from_static(""))
}
