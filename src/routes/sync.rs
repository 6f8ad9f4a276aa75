//! Sync API endpoints
//!
//! On-demand cycle trigger and status of the last cycle.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::Result;
use crate::prefs::keys;
use crate::reconcile::CycleSummary;
use crate::scheduler::{CycleReport, Trigger};
use crate::state::AppState;

/// Create the sync router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/run", post(run_cycle))
        .route("/status", get(get_status))
}

#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    pub running: bool,
    /// Cursor the next cycle resumes from
    pub cursor: Option<String>,
    #[serde(rename = "intervalSecs")]
    pub interval_secs: u64,
    #[serde(rename = "lastCycle")]
    pub last_cycle: Option<CycleReport>,
}

/// Run a cycle now; 409 if one is already running
async fn run_cycle(State(state): State<AppState>) -> Result<(StatusCode, Json<CycleSummary>)> {
    let summary = state.runner().trigger(Trigger::Manual).await?;
    Ok((StatusCode::ACCEPTED, Json(summary)))
}

async fn get_status(State(state): State<AppState>) -> Result<Json<SyncStatusResponse>> {
    let cursor = state
        .prefs()
        .get(keys::CHANGES_TOKEN)
        .await?
        .filter(|token| !token.is_empty());

    Ok(Json(SyncStatusResponse {
        running: state.runner().is_running(),
        cursor,
        interval_secs: state.config().sync.interval().as_secs(),
        last_cycle: state.runner().last_report().await,
    }))
}
