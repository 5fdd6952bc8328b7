//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Root configuration for the gateway process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Business application that admitted requests are forwarded to.
    /// When absent, admitted requests get a built-in acknowledgement.
    pub upstream: Option<UpstreamConfig>,

    /// The immutable security bundle handed to the gateway.
    pub security: SecurityConfig,

    /// Background eviction of cold rate-limit state.
    pub sweep: SweepConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Operator API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time allowed for one request, gate and handler included.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Upstream business application.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL, e.g. "http://127.0.0.1:3000".
    pub url: String,

    /// Upstream response timeout in seconds.
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

fn default_upstream_timeout() -> u64 {
    15
}

/// Security bundle: everything the request pipeline consults.
///
/// Constructed once and never mutated by request handling. A reload replaces
/// the whole value.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    pub rate_limit: RateLimitConfig,
    pub cors: CorsConfig,
    pub validation: ValidationConfig,
    pub authentication: AuthenticationConfig,
    pub headers: HeadersConfig,

    /// Peers whose X-Forwarded-For / X-Real-IP headers are believed.
    pub trusted_proxies: Vec<IpAddr>,

    /// Development mode: expose diagnostic detail in denial bodies.
    pub debug: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
            validation: ValidationConfig::default(),
            authentication: AuthenticationConfig::default(),
            headers: HeadersConfig::default(),
            trusted_proxies: Vec::new(),
            debug: false,
        }
    }
}

impl SecurityConfig {
    /// Tighter preset: lower threshold, no cross-origin callers, smaller
    /// bodies and mandatory authentication.
    pub fn high_security() -> Self {
        Self {
            rate_limit: RateLimitConfig {
                max_requests: 50,
                ..RateLimitConfig::default()
            },
            cors: CorsConfig {
                enabled: true,
                origins: Vec::new(),
                methods: strings(&["GET", "POST"]),
                allowed_headers: strings(&["Content-Type", "Authorization"]),
                exposed_headers: strings(&["X-RateLimit-Limit"]),
                max_age_secs: 86_400,
            },
            validation: ValidationConfig {
                max_body_size: 512 * 1024,
                allow_xss: false,
            },
            authentication: AuthenticationConfig {
                required: true,
                allow_anonymous: strings(&["/api/health"]),
                ..AuthenticationConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Fixed-window rate limiting with escalation to temporary bans.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests admitted per identifier per window.
    pub max_requests: u64,

    /// Attempts beyond `ban_multiplier * max_requests` in one window ban the identifier.
    pub ban_multiplier: u64,

    /// Length of an escalation ban in milliseconds.
    pub ban_duration_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 15 * 60 * 1000,
            max_requests: 100,
            ban_multiplier: 3,
            ban_duration_ms: 60 * 60 * 1000,
        }
    }
}

/// CORS allow-lists.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    /// Exact origins, or "*" to accept any.
    pub origins: Vec<String>,
    pub methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    /// Preflight cache lifetime in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            origins: strings(&["http://localhost:3000", "http://localhost:3001"]),
            methods: strings(&["GET", "POST", "PUT", "DELETE", "OPTIONS"]),
            allowed_headers: strings(&["Content-Type", "Authorization", "X-API-Key"]),
            exposed_headers: strings(&[
                "X-RateLimit-Limit",
                "X-RateLimit-Remaining",
                "X-RateLimit-Reset",
            ]),
            max_age_secs: 86_400,
        }
    }
}

/// Body inspection limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Maximum serialized JSON body size in bytes.
    pub max_body_size: usize,
    /// Skip script/event-handler detection.
    pub allow_xss: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_body_size: 1024 * 1024,
            allow_xss: false,
        }
    }
}

/// Authentication chain settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AuthenticationConfig {
    /// Deny requests that no credential method accepts.
    pub required: bool,

    /// Paths reachable without credentials (exact, or as a path prefix).
    pub allow_anonymous: Vec<String>,

    /// HMAC secret for bearer tokens. Bearer tokens are refused without it.
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,

    /// HS256, HS384 or HS512.
    pub jwt_algorithm: String,

    /// Clock skew tolerated on the `exp` claim, in seconds.
    pub leeway_secs: u64,

    /// Accepted X-API-Key values.
    #[serde(skip_serializing)]
    pub api_keys: Vec<String>,

    /// Request budget advertised for API-key callers.
    pub api_key_rate_limit: u64,

    /// Cookie carrying the session identifier.
    pub session_cookie: String,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            required: false,
            allow_anonymous: strings(&["/api/health", "/api/public"]),
            jwt_secret: None,
            jwt_algorithm: "HS256".to_string(),
            leeway_secs: 0,
            api_keys: Vec::new(),
            api_key_rate_limit: 1000,
            session_cookie: "session".to_string(),
        }
    }
}

/// Hardening headers.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HeadersConfig {
    pub enabled: bool,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Background sweep of expired windows and bans.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SweepConfig {
    pub enabled: bool,

    /// Periodic sweep interval in seconds.
    pub interval_secs: u64,

    /// Also sweep after this many rate-limit checks (0 disables the trigger).
    pub request_threshold: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            request_threshold: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Operator API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the operator API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    #[serde(skip_serializing)]
    pub api_key: String,

    /// Operator API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
