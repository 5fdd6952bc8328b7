//! Forwarding admitted requests to the business application.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the configured upstream base
//! - Strip hop-by-hop headers in both directions
//! - Map connect failures to 502 and slow upstreams to 504
//!
//! # Design Decisions
//! - Bodies stream through; the gate has already buffered and re-emitted any
//!   body it needed to inspect
//! - No retries: mutating requests are not safe to replay

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{
        header,
        uri::{Authority, PathAndQuery, Scheme},
        HeaderMap, HeaderName, Request, StatusCode, Uri,
    },
    response::Response,
};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::json;
use thiserror::Error;

use crate::config::UpstreamConfig;
use crate::gateway::error::json_response;
use crate::http::handler::RequestHandler;
use crate::http::request::request_id;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream url '{0}'")]
    InvalidUrl(String),
}

pub struct UpstreamHandler {
    client: Client<HttpConnector, Body>,
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    timeout: Duration,
}

impl UpstreamHandler {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let invalid = || UpstreamError::InvalidUrl(config.url.clone());
        let uri: Uri = config.url.parse().map_err(|_| invalid())?;
        let parts = uri.into_parts();

        let scheme = parts.scheme.ok_or_else(invalid)?;
        if scheme != Scheme::HTTP {
            return Err(invalid());
        }
        let authority = parts.authority.ok_or_else(invalid)?;
        let base_path = parts
            .path_and_query
            .map(|p| p.path().trim_end_matches('/').to_string())
            .unwrap_or_default();

        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            scheme,
            authority,
            base_path,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn target_uri(&self, original: &Uri) -> Result<Uri, axum::http::Error> {
        let tail = original.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        let path_and_query = PathAndQuery::try_from(format!("{}{}", self.base_path, tail))?;
        Ok(Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()?)
    }
}

#[async_trait]
impl RequestHandler for UpstreamHandler {
    async fn handle(&self, request: Request<Body>) -> Response {
        let id = request_id(&request).to_string();
        let (mut parts, body) = request.into_parts();

        parts.uri = match self.target_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(request_id = %id, error = %e, "Could not build upstream URI");
                return json_response(StatusCode::BAD_GATEWAY, &json!({"error": "Upstream request failed"}));
            }
        };
        strip_hop_by_hop(&mut parts.headers);
        parts.headers.remove(header::HOST);

        let outbound = Request::from_parts(parts, body);
        match tokio::time::timeout(self.timeout, self.client.request(outbound)).await {
            Ok(Ok(response)) => relay(response),
            Ok(Err(e)) => {
                tracing::error!(request_id = %id, error = %e, "Upstream error");
                json_response(StatusCode::BAD_GATEWAY, &json!({"error": "Upstream request failed"}))
            }
            Err(_) => {
                tracing::warn!(request_id = %id, timeout = ?self.timeout, "Upstream timed out");
                json_response(StatusCode::GATEWAY_TIMEOUT, &json!({"error": "Upstream timed out"}))
            }
        }
    }
}

fn relay(response: Response<Incoming>) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in Connection are hop-by-hop too.
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn upstream(url: &str) -> Result<UpstreamHandler, UpstreamError> {
        UpstreamHandler::new(&UpstreamConfig {
            url: url.to_string(),
            timeout_secs: 5,
        })
    }

    #[tokio::test]
    async fn test_target_uri_keeps_base_path_and_query() {
        let handler = upstream("http://127.0.0.1:3000/app/").unwrap();
        let original: Uri = "/api/posts?page=2".parse().unwrap();

        let target = handler.target_uri(&original).unwrap();
        assert_eq!(target.to_string(), "http://127.0.0.1:3000/app/api/posts?page=2");
    }

    #[tokio::test]
    async fn test_rejects_unusable_urls() {
        assert!(upstream("not a url").is_err());
        assert!(upstream("/relative/only").is_err());
        assert!(upstream("https://tls.example").is_err());
    }

    #[test]
    fn test_hop_by_hop_headers_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-trace-hop", HeaderValue::from_static("1"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);

        assert!(!headers.contains_key(header::CONNECTION));
        assert!(!headers.contains_key("keep-alive"));
        assert!(!headers.contains_key("x-trace-hop"));
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }
}
