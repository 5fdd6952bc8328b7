//! HTTP layer tests: in-process via the router, and over real sockets with a
//! mock upstream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use request_gate::config::{GateConfig, SecurityConfig, UpstreamConfig};
use request_gate::gateway::Gateway;
use request_gate::http::{AckHandler, HttpServer, RequestHandler, UpstreamHandler};
use request_gate::lifecycle::Shutdown;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceExt;

mod common;

fn server(config: GateConfig, handler: Arc<dyn RequestHandler>) -> HttpServer {
    let gateway = Arc::new(Gateway::new(config.security.clone()).unwrap());
    HttpServer::new(config, gateway, handler)
}

/// Serve on an ephemeral port; returns the address and the server task.
async fn spawn(config: GateConfig, handler: Arc<dyn RequestHandler>, shutdown: &Shutdown) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = server(config, handler);
    let rx = shutdown.subscribe();
    let task = tokio::spawn(async move {
        server.run(listener, rx).await.unwrap();
    });
    (addr, task)
}

fn upstream_handler(addr: SocketAddr, timeout_secs: u64) -> Arc<dyn RequestHandler> {
    Arc::new(
        UpstreamHandler::new(&UpstreamConfig {
            url: format!("http://{}", addr),
            timeout_secs,
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn test_router_assigns_request_id_and_security_headers() {
    let app = server(GateConfig::default(), Arc::new(AckHandler)).into_router();

    let response = app
        .oneshot(Request::builder().uri("/api/posts").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let id = response.headers()["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(response.headers()["x-ratelimit-limit"], "100");
}

#[tokio::test]
async fn test_router_keeps_client_request_id() {
    let app = server(GateConfig::default(), Arc::new(AckHandler)).into_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header("x-request-id", "trace-abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "trace-abc-123");
}

#[tokio::test]
async fn test_router_rejects_injection() {
    let app = server(GateConfig::default(), Arc::new(AckHandler)).into_router();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/search")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"q": "1 UNION SELECT password FROM users"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

struct Panicking;

#[async_trait]
impl RequestHandler for Panicking {
    async fn handle(&self, _request: Request<Body>) -> Response {
        panic!("handler exploded with secret detail")
    }
}

#[tokio::test]
async fn test_handler_panic_becomes_generic_500() {
    let app = server(GateConfig::default(), Arc::new(Panicking)).into_router();

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");
    let body = common::json_body(response).await;
    assert_eq!(body, serde_json::json!({"error": "Internal security error"}));
}

#[tokio::test]
async fn test_forwards_admitted_requests_to_upstream() {
    let upstream = common::start_mock_upstream("hello from upstream").await;
    let shutdown = Shutdown::new();
    let (addr, task) = spawn(GateConfig::default(), upstream_handler(upstream, 5), &shutdown).await;

    let client = reqwest::Client::new();
    let res = client
        .get(format!("http://{}/api/posts", addr))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key("x-ratelimit-remaining"));
    assert!(res.headers().contains_key("strict-transport-security"));
    assert_eq!(res.text().await.unwrap(), "hello from upstream");

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_denied_requests_do_not_reach_upstream() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let upstream = common::start_programmable_upstream(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            (200, "ok".to_string())
        }
    })
    .await;

    let mut config = GateConfig::default();
    config.security = SecurityConfig::high_security();
    let shutdown = Shutdown::new();
    let (addr, _task) = spawn(config, upstream_handler(upstream, 5), &shutdown).await;

    let client = reqwest::Client::new();
    let res = client
        .post(format!("http://{}/api/posts", addr))
        .json(&serde_json::json!({"title": "<script>steal()</script>"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(format!("http://{}/api/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_upstream_is_502() {
    let upstream = common::closed_port().await;
    let shutdown = Shutdown::new();
    let (addr, _task) = spawn(GateConfig::default(), upstream_handler(upstream, 5), &shutdown).await;

    let res = reqwest::get(format!("http://{}/", addr)).await.unwrap();
    assert_eq!(res.status(), 502);
    assert!(res.headers().contains_key("content-security-policy"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_slow_upstream_is_504() {
    let upstream = common::start_programmable_upstream(|| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "late".to_string())
    })
    .await;
    let shutdown = Shutdown::new();
    let (addr, _task) = spawn(GateConfig::default(), upstream_handler(upstream, 1), &shutdown).await;

    let res = reqwest::get(format!("http://{}/", addr)).await.unwrap();
    assert_eq!(res.status(), 504);

    shutdown.trigger();
}

#[tokio::test]
async fn test_peer_address_drives_rate_limit() {
    let mut config = GateConfig::default();
    config.security.rate_limit.max_requests = 1;
    let shutdown = Shutdown::new();
    let (addr, _task) = spawn(config, Arc::new(AckHandler), &shutdown).await;

    let client = reqwest::Client::new();
    let first = client.get(format!("http://{}/", addr)).send().await.unwrap();
    assert_eq!(first.status(), 200);

    // Spoofed forwarding headers from an untrusted peer change nothing.
    let second = client
        .get(format!("http://{}/", addr))
        .header("x-forwarded-for", "192.0.2.200")
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 429);
    assert!(second.headers().contains_key("retry-after"));

    shutdown.trigger();
}
