mod index_region;
mod state;

pub use index_region::{IndexRegionBody, index_region};
pub use state::{StateQuery, regionindexer_state};

use crate::indexer::RegionIndexer;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub indexer: Arc<RegionIndexer>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/index_region", post(index_region))
        .route("/_regionindexer_state", get(regionindexer_state))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
