//! Request-gating security pipeline library.

// Core
pub mod config;
pub mod gateway;
pub mod http;
pub mod security;

// Operations
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use config::schema::{GateConfig, SecurityConfig};
pub use gateway::{GateError, Gateway, PipelineResult, Stage};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::{AuthOutcome, RateLimiter};
