//! Request gating subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → pipeline.rs (snapshot load, client identifier)
//!         Start        → CORS preflight short-circuit
//!         CorsChecked  → rate limit (429 + Retry-After)
//!         RateChecked  → authentication, when required (401)
//!         AuthChecked  → body validation for POST/PUT/PATCH (400)
//!         Validated    → forward to the request handler
//!     → error.rs (denial bodies and rate-limit headers)
//!     → CORS + hardening headers on the way out
//! ```
//!
//! # Design Decisions
//! - Each stage builds its own denial; nothing but a session-store failure
//!   becomes an internal error
//! - The gate is usable directly (`Gateway::process`) or as an axum
//!   middleware (`gate_middleware`)

pub mod error;
pub mod middleware;
pub mod outcome;
pub mod pipeline;

pub use error::{DenialBody, GateError};
pub use middleware::gate_middleware;
pub use outcome::{Admitted, Denial, PipelineResult, Stage};
pub use pipeline::{GateSnapshot, Gateway, GatewayBuilder};
