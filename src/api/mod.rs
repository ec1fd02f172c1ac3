use axum::Router;
use std::sync::Arc;

use crate::AppState;

mod catalog;
mod meta;
mod system;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(catalog::routes())
        .merge(meta::routes())
        .merge(system::routes())
}
