//! Health check endpoint
//!
//! Reports the project pipeline as seen from this process: how many projects
//! sit in each status, which runs are live here, and how many projects are
//! stuck in `processing` with no live run (candidates for abandon).

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::db;
use crate::models::ProjectStatusCounts;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the project table cannot be read
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    /// Project runs executing in this process
    pub active_runs: usize,
    /// Projects per status; absent when the database could not be queried
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projects: Option<ProjectStatusCounts>,
    /// `processing` projects without a live run in this process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stalled_projects: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64;
    let active_runs = state.active_runs.read().await.len();
    let mut last_error = state.last_error.read().await.clone();

    let projects = match db::projects::count_by_status(&state.db).await {
        Ok(counts) => Some(counts),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not count projects");
            last_error = Some(e.to_string());
            None
        }
    };
    let stalled_projects = projects.map(|counts| counts.processing.saturating_sub(active_runs as u64));

    Json(HealthResponse {
        status: if projects.is_some() { "ok" } else { "degraded" },
        module: "flyer-resolver",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        active_runs,
        projects,
        stalled_projects,
        last_error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
