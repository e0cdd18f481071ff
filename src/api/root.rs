//! Liveness and log inspection

use axum::{
    Json,
    extract::{Query, State as AxumState},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

use crate::SharedState;

const DEFAULT_LOG_LIMIT: usize = 200;

#[derive(Debug, Deserialize, Default)]
pub struct RootParams {
    #[serde(default)]
    pub logs: bool,
    pub limit: Option<usize>,
}

/// Root health check endpoint
/// Supports ?logs=true (and optionally &limit=N) to dump recent log lines as JSON
pub async fn root(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<RootParams>,
) -> impl IntoResponse {
    if !params.logs {
        return "github_snap_builder - healthy".into_response();
    }

    let logs = state.logs.recent(params.limit.unwrap_or(DEFAULT_LOG_LIMIT));
    Json(json!({
        "name": "github_snap_builder",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at,
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "events": state.router.events(),
        "logs": logs,
    }))
    .into_response()
}
