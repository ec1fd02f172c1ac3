// Status and administrative endpoints

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(get_status))
        .route("/refresh", post(trigger_refresh))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub cache_state: &'static str,
    pub episode_count: usize,
    pub snapshot_created_at: Option<DateTime<Utc>>,
    pub trakt_configured: bool,
    pub list_id: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub episode_count: usize,
    pub created_at: DateTime<Utc>,
}

/// GET /status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let snapshot = state.cache.current().await;
    Json(StatusResponse {
        status: "ok",
        cache_state: state.cache.freshness().await.as_str(),
        episode_count: snapshot.as_ref().map(|s| s.len()).unwrap_or(0),
        snapshot_created_at: snapshot.map(|s| s.created_at),
        trakt_configured: state.config.trakt_configured(),
        list_id: state.config.trakt_list_id(),
        username: state.config.trakt_username(),
    })
}

/// POST /refresh
///
/// Forces an aggregation pass. Idempotent and safe to call concurrently
/// with reads: the refresh is single-flight and a failure leaves the
/// published snapshot untouched.
async fn trigger_refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshResponse>, (StatusCode, String)> {
    match state.cache.refresh().await {
        Ok(snapshot) => Ok(Json(RefreshResponse {
            episode_count: snapshot.len(),
            created_at: snapshot.created_at,
        })),
        Err(e) => {
            tracing::error!("Manual refresh failed: {:#}", e);
            Err((StatusCode::BAD_GATEWAY, format!("Refresh failed: {e:#}")))
        }
    }
}
