//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum setup, layers, graceful shutdown)
//!     → request.rs (x-request-id assigned, recorded on the span)
//!     → gateway (admission)
//!     → handler.rs (built-in acknowledgement) or upstream.rs (forwarding)
//!     → Send to client
//! ```

pub mod handler;
pub mod request;
pub mod server;
pub mod upstream;

pub use handler::{AckHandler, RequestHandler};
pub use request::{MakeRequestUuidV4, X_REQUEST_ID};
pub use server::HttpServer;
pub use upstream::{UpstreamError, UpstreamHandler};
