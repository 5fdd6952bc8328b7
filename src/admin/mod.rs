//! Operator API.
//!
//! Served on its own listener, never through the gate. Every route requires
//! the configured bearer key.
//!
//! ```text
//! GET    /admin/status
//! GET    /admin/stats
//! GET    /admin/bans
//! POST   /admin/bans               {"identifier": "...", "duration_ms": 60000}
//! DELETE /admin/bans/{identifier}
//! ```

pub mod auth;
pub mod handlers;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};

use crate::gateway::Gateway;
use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub gateway: Arc<Gateway>,
    pub api_key: Arc<str>,
    pub started: Instant,
    /// Configuration reloads applied since startup.
    pub reloads: Arc<AtomicU64>,
}

impl AdminState {
    pub fn new(gateway: Arc<Gateway>, api_key: &str) -> Self {
        Self {
            gateway,
            api_key: Arc::from(api_key),
            started: Instant::now(),
            reloads: Arc::new(AtomicU64::new(0)),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/stats", get(get_stats))
        .route("/admin/bans", get(list_bans).post(create_ban))
        .route("/admin/bans/{identifier}", delete(delete_ban))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::SecurityConfig;

    fn state() -> AdminState {
        let gateway = Arc::new(Gateway::new(SecurityConfig::default()).unwrap());
        AdminState::new(gateway, "operator-key")
    }

    fn call(method: Method, uri: &str, key: Option<&str>, body: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_api_key() {
        let app = setup_admin_router(state());

        let response = app
            .clone()
            .oneshot(call(Method::GET, "/admin/status", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(call(Method::GET, "/admin/status", Some("wrong"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_empty_configured_key_locks_everything() {
        let gateway = Arc::new(Gateway::new(SecurityConfig::default()).unwrap());
        let app = setup_admin_router(AdminState::new(gateway, ""));

        let response = app
            .oneshot(call(Method::GET, "/admin/status", Some(""), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ban_lifecycle() {
        let state = state();
        let app = setup_admin_router(state.clone());

        let response = app
            .clone()
            .oneshot(call(
                Method::POST,
                "/admin/bans",
                Some("operator-key"),
                Some(r#"{"identifier":"198.51.100.7"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(state.gateway.limiter().check("198.51.100.7", &Default::default()).banned);

        let response = app
            .clone()
            .oneshot(call(Method::GET, "/admin/bans", Some("operator-key"), None))
            .await
            .unwrap();
        let bans = json(response).await;
        assert_eq!(bans[0]["identifier"], "198.51.100.7");
        assert_eq!(bans[0]["source"], "manual");
        assert!(bans[0]["expires_at"].is_null());

        let response = app
            .clone()
            .oneshot(call(Method::DELETE, "/admin/bans/198.51.100.7", Some("operator-key"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(call(Method::DELETE, "/admin/bans/198.51.100.7", Some("operator-key"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_and_stats() {
        let state = state();
        state.gateway.limiter().check("203.0.113.1", &Default::default());
        let app = setup_admin_router(state);

        let response = app
            .clone()
            .oneshot(call(Method::GET, "/admin/status", Some("operator-key"), None))
            .await
            .unwrap();
        let status = json(response).await;
        assert_eq!(status["status"], "operational");
        assert_eq!(status["authentication_required"], false);

        let response = app
            .oneshot(call(Method::GET, "/admin/stats", Some("operator-key"), None))
            .await
            .unwrap();
        let stats = json(response).await;
        assert_eq!(stats["active_windows"], 1);
        assert_eq!(stats["total_requests"], 1);
    }
}
