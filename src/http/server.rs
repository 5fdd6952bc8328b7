//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the axum router: every path falls through to the gate, then to
//!   the configured request handler
//! - Wire up middleware (panic capture, request ID, tracing, timeout)
//! - Serve with peer addresses and graceful shutdown
//!
//! # Layer order (outermost first)
//! ```text
//! CatchPanic → SetRequestId → Trace → PropagateRequestId → gate → Timeout → handler
//! ```
//! The timeout sits inside the gate so a 408 still gets hardening headers.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware,
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GateConfig;
use crate::gateway::{gate_middleware, GateError, Gateway};
use crate::http::handler::RequestHandler;
use crate::http::request::{request_id, MakeRequestUuidV4};
use crate::security::headers::apply_security_headers;

/// HTTP server for the gate.
pub struct HttpServer {
    router: Router,
    config: GateConfig,
}

impl HttpServer {
    pub fn new(config: GateConfig, gateway: Arc<Gateway>, handler: Arc<dyn RequestHandler>) -> Self {
        let router = Self::build_router(&config, gateway, handler);
        Self { router, config }
    }

    #[allow(deprecated)]
    fn build_router(config: &GateConfig, gateway: Arc<Gateway>, handler: Arc<dyn RequestHandler>) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(handler)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(middleware::from_fn_with_state(gateway, gate_middleware))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id(request),
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
            .layer(CatchPanicLayer::custom(panic_response))
    }

    /// Hand out the router, e.g. for in-process tests.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = ?self.config.upstream.as_ref().map(|u| u.url.as_str()),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }
}

async fn dispatch(State(handler): State<Arc<dyn RequestHandler>>, request: Request<Body>) -> Response {
    handler.handle(request).await
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(detail = %detail, "Request handler panicked");

    let mut response = GateError::Internal(detail.to_string()).into_response(false);
    apply_security_headers(response.headers_mut());
    response
}
