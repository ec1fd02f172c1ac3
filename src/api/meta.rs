// Episode lookup endpoint - single-episode reads by identity triple

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::models::Episode;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/meta/:show_id/:season/:episode", get(lookup_episode))
}

/// GET /meta/:show_id/:season/:episode
///
/// Identity is the (show key, season, episode) triple - positions shift on
/// every reshuffle, so clients must never address by index. Not-found is a
/// normal outcome for clients probing ids from an older snapshot.
async fn lookup_episode(
    State(state): State<Arc<AppState>>,
    Path((show_id, season, episode)): Path<(String, u32, u32)>,
) -> Result<Json<Episode>, (StatusCode, String)> {
    let snapshot = state.cache.snapshot().await.map_err(|e| {
        tracing::warn!("Lookup with no snapshot available: {:#}", e);
        (StatusCode::NOT_FOUND, "No catalog published yet".to_string())
    })?;

    snapshot
        .find(&show_id, season, episode)
        .cloned()
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("Episode {show_id} S{season}E{episode} not found"),
            )
        })
}
