//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (preflight answered here)
//!     → headers.rs (resolve client identifier)
//!     → rate_limit.rs (per-identifier window, ban set)
//!     → auth.rs (bearer → API key → session)
//!     → validation.rs (injection detection on JSON bodies)
//!     → Pass to gateway for forwarding
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure
//! - No trust in client input
//! - State lives in explicit objects (no process-wide singletons)

pub mod auth;
pub mod clock;
pub mod cors;
pub mod headers;
pub mod rate_limit;
pub mod session;
pub mod sweeper;
pub mod validation;

pub use auth::{ApiKeyMetadata, AuthMethod, AuthOutcome, Authenticator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cors::CorsPolicy;
pub use rate_limit::{BanEntry, BanSource, RateDecision, RateLimiter, RateLimiterStats, SweepReport};
pub use session::{MemorySessionStore, Session, SessionStore, SessionStoreError};
pub use sweeper::Sweeper;
pub use validation::{
    sanitize_html, validate_body, validate_file_upload, FileDescriptor, FileRejection,
    FileUploadPolicy, SchemaValidator, ValidationOutcome, Violation, ViolationKind,
};
