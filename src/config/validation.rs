//! Configuration validation.
//!
//! Serde handles syntax; this pass checks value ranges and cross-field rules
//! and returns every problem found, not just the first.

use std::net::SocketAddr;

use axum::http::Method;
use thiserror::Error;

use crate::config::schema::GateConfig;
use crate::security::auth::MAX_LEEWAY_SECS;

/// A single semantic problem in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if let Some(upstream) = &config.upstream {
        match url::Url::parse(&upstream.url) {
            Ok(url) if url.scheme() == "http" && url.host_str().is_some() => {}
            Ok(_) => errors.push(ValidationError::new(
                "upstream.url",
                "only http:// upstreams with a host are supported",
            )),
            Err(e) => errors.push(ValidationError::new("upstream.url", e.to_string())),
        }
        if upstream.timeout_secs == 0 {
            errors.push(ValidationError::new("upstream.timeout_secs", "must be greater than 0"));
        }
    }

    let rate = &config.security.rate_limit;
    if rate.enabled {
        if rate.window_ms == 0 {
            errors.push(ValidationError::new("security.rate_limit.window_ms", "must be greater than 0"));
        }
        if rate.max_requests == 0 {
            errors.push(ValidationError::new("security.rate_limit.max_requests", "must be greater than 0"));
        }
        if rate.ban_multiplier == 0 {
            errors.push(ValidationError::new("security.rate_limit.ban_multiplier", "must be at least 1"));
        }
    }

    for method in &config.security.cors.methods {
        if method.parse::<Method>().is_err() {
            errors.push(ValidationError::new(
                "security.cors.methods",
                format!("'{}' is not an HTTP method", method),
            ));
        }
    }

    if config.security.validation.max_body_size == 0 {
        errors.push(ValidationError::new("security.validation.max_body_size", "must be greater than 0"));
    }

    let auth = &config.security.authentication;
    if !matches!(auth.jwt_algorithm.as_str(), "HS256" | "HS384" | "HS512") {
        errors.push(ValidationError::new(
            "security.authentication.jwt_algorithm",
            format!("'{}' is not an HMAC algorithm (HS256, HS384, HS512)", auth.jwt_algorithm),
        ));
    }
    if auth.leeway_secs > MAX_LEEWAY_SECS {
        errors.push(ValidationError::new(
            "security.authentication.leeway_secs",
            format!("must be at most {} seconds", MAX_LEEWAY_SECS),
        ));
    }
    if matches!(&auth.jwt_secret, Some(secret) if secret.is_empty()) {
        errors.push(ValidationError::new("security.authentication.jwt_secret", "must not be empty"));
    }
    if auth.api_keys.iter().any(|k| k.trim().is_empty()) {
        errors.push(ValidationError::new("security.authentication.api_keys", "keys must not be blank"));
    }

    if config.sweep.enabled && config.sweep.interval_secs == 0 {
        errors.push(ValidationError::new("sweep.interval_secs", "must be greater than 0"));
    }

    if config.observability.metrics_enabled {
        check_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new("observability.log_format", "expected 'pretty' or 'json'"));
    }

    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "required when the admin API is enabled"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("'{}' is not a socket address", value)));
    }
}
