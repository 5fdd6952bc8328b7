//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway stages and the rate limiter produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every denial is logged at warn with the stage and client identifier
//! - Request ID (x-request-id) is attached by the HTTP layer's trace span
//! - Metrics are cheap (no-ops until a recorder is installed)

pub mod logging;
pub mod metrics;
