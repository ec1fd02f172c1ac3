// Catalog endpoint - paginated reads over the current shuffled snapshot

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::Episode;
use crate::AppState;

const DEFAULT_PAGE_LIMIT: usize = 100;
const MAX_PAGE_LIMIT: usize = 500;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/catalog", get(list_catalog))
}

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub episodes: Vec<Episode>,
    pub total: usize,
    pub skip: usize,
}

/// GET /catalog?skip=0&limit=100
///
/// Serves from the snapshot cache; a skip past the end of the snapshot is an
/// empty page. On true cold start with the upstream down there is nothing to
/// serve yet, and an empty page is the correct answer.
async fn list_catalog(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CatalogQuery>,
) -> Json<CatalogResponse> {
    let skip = query.skip.unwrap_or(0);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);

    let snapshot = match state.cache.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!("Catalog unavailable: {:#}", e);
            return Json(CatalogResponse {
                episodes: Vec::new(),
                total: 0,
                skip,
            });
        }
    };

    Json(CatalogResponse {
        episodes: snapshot.page(skip, limit).to_vec(),
        total: snapshot.len(),
        skip,
    })
}
