use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use crate::{Result, indexer::StatusReport};
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    /// Comma separated dataset uuids, or `all`
    pub reindex: Option<String>,
    /// URL to notify once staged work has drained
    pub notify: Option<String>,
}

pub async fn regionindexer_state(
    State(state): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Json<StatusReport>> {
    let report = state
        .indexer
        .status(query.reindex.as_deref(), query.notify.as_deref())
        .await?;
    Ok(Json(report))
}
