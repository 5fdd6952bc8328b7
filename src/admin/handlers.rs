use std::sync::atomic::Ordering;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::security::rate_limit::{BanSource, RateLimiterStats};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub reloads: u64,
    pub authentication_required: bool,
    pub rate_limit_enabled: bool,
    pub debug: bool,
}

#[derive(Serialize)]
pub struct BanView {
    pub identifier: String,
    /// Epoch milliseconds; absent for bans that last until lifted.
    pub expires_at: Option<u64>,
    pub source: BanSource,
}

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    pub identifier: String,
    pub duration_ms: Option<u64>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let snapshot = state.gateway.snapshot();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
        reloads: state.reloads.load(Ordering::Relaxed),
        authentication_required: snapshot.config.authentication.required,
        rate_limit_enabled: snapshot.config.rate_limit.enabled,
        debug: snapshot.config.debug,
    })
}

pub async fn get_stats(State(state): State<AdminState>) -> Json<RateLimiterStats> {
    Json(state.gateway.limiter().stats())
}

pub async fn list_bans(State(state): State<AdminState>) -> Json<Vec<BanView>> {
    let bans = state
        .gateway
        .limiter()
        .banned()
        .into_iter()
        .map(|(identifier, entry)| BanView {
            identifier,
            expires_at: entry.expires_at,
            source: entry.source,
        })
        .collect();
    Json(bans)
}

pub async fn create_ban(
    State(state): State<AdminState>,
    Json(ban): Json<BanRequest>,
) -> Result<(StatusCode, Json<BanView>), (StatusCode, Json<serde_json::Value>)> {
    let identifier = ban.identifier.trim();
    if identifier.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "identifier must not be empty"})),
        ));
    }

    let limiter = state.gateway.limiter();
    limiter.block_manually(identifier, ban.duration_ms);
    let expires_at = ban.duration_ms.map(|d| limiter.now_ms().saturating_add(d));

    Ok((
        StatusCode::CREATED,
        Json(BanView {
            identifier: identifier.to_string(),
            expires_at,
            source: BanSource::Manual,
        }),
    ))
}

pub async fn delete_ban(State(state): State<AdminState>, Path(identifier): Path<String>) -> StatusCode {
    if state.gateway.limiter().unblock(&identifier) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
