use axum::{Json, extract::State};
use serde::Deserialize;
use crate::{Result, indexer::CycleReport};
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct IndexRegionBody {
    #[serde(default)]
    pub dry_run: bool,
}

/// Run one indexing cycle. Invoked by the external cycle coordinator.
pub async fn index_region(
    State(state): State<AppState>,
    body: Option<Json<IndexRegionBody>>,
) -> Result<Json<CycleReport>> {
    let dry_run = body.is_some_and(|Json(body)| body.dry_run);
    let report = state.indexer.run_cycle(dry_run).await?;
    Ok(Json(report))
}
