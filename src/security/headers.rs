//! Header handling: hardening headers on responses, client identity from
//! request headers.
//!
//! # Design Decisions
//! - X-Forwarded-For / X-Real-IP are believed only from configured proxies;
//!   anyone else could pick their own rate-limit identity
//! - Hardening headers are applied to every response, denials included

use std::net::IpAddr;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

const SECURITY_HEADERS: [(&str, &str); 7] = [
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains; preload",
    ),
    ("x-xss-protection", "1; mode=block"),
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    (
        "content-security-policy",
        "default-src 'self'; script-src 'self' 'unsafe-inline' 'unsafe-eval'; \
         style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; font-src 'self' data:; \
         connect-src 'self' https:; frame-ancestors 'none';",
    ),
    (
        "permissions-policy",
        "camera=(), microphone=(), geolocation=(), interest-cohort=()",
    ),
];

/// Append the baseline hardening headers, replacing any set upstream.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    for (name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
}

/// Resolve the rate-limiting identifier for a request.
///
/// Forwarding headers count only when `peer` is a trusted proxy. Falls back
/// to the peer address, then to `"unknown"`.
pub fn client_identifier(headers: &HeaderMap, peer: Option<IpAddr>, trusted_proxies: &[IpAddr]) -> String {
    let trusted = peer.is_some_and(|p| trusted_proxies.contains(&p));

    if trusted {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let real_ip = || {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        if let Some(ip) = forwarded.or_else(real_ip) {
            return ip.to_string();
        }
    }

    peer.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
}
