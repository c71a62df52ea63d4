//! Project and product API handlers
//!
//! POST /projects, GET /projects, GET /projects/:id,
//! POST|GET /projects/:id/products,
//! POST /projects/:id/process, /cancel, /abandon

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use flyer_common::events::FlyerEvent;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db,
    error::{ApiError, ApiResult},
    models::{NewProduct, NewProject, Product, Project, ProjectStatus},
    services::{abandon_run, RunError, RunOutcome},
    ActiveRun, AppState,
};

/// POST /projects/:id/process response
#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub project_id: Uuid,
    pub status: ProjectStatus,
    pub started_at: DateTime<Utc>,
}

/// POST /projects/:id/cancel response
#[derive(Debug, Serialize)]
pub struct CancelRunResponse {
    pub project_id: Uuid,
    pub cancel_requested: bool,
}

async fn require_project(state: &AppState, project_id: Uuid) -> ApiResult<Project> {
    db::projects::load_project(&state.db, project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project not found: {}", project_id)))
}

/// POST /projects
pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<NewProject>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let project = db::projects::create_project(&state.db, request).await?;
    state.event_bus.emit_lossy(FlyerEvent::row_changed("projects", project.id));

    tracing::info!(project_id = %project.id, name = %project.name, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /projects
pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(db::projects::list_projects(&state.db).await?))
}

/// GET /projects/:id
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Project>> {
    Ok(Json(require_project(&state, project_id).await?))
}

/// POST /projects/:id/products
///
/// Products cannot be added while the project is processing; the running
/// batch was fixed when the run started.
pub async fn add_product(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(request): Json<NewProduct>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    let project = require_project(&state, project_id).await?;
    if project.status == ProjectStatus::Processing {
        return Err(ApiError::Conflict(format!(
            "Project {} is processing; add products after the run",
            project_id
        )));
    }

    let product = db::products::add_product(&state.db, project_id, request).await?;
    state.event_bus.emit_lossy(FlyerEvent::row_changed("products", product.id));

    Ok((StatusCode::CREATED, Json(product)))
}

/// GET /projects/:id/products
pub async fn list_products(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Product>>> {
    require_project(&state, project_id).await?;
    Ok(Json(db::products::list_products(&state.db, project_id).await?))
}

/// POST /projects/:id/process
///
/// Claims the project and runs it in a background task. Returns 202 Accepted;
/// progress is reported over `/events`. A project without products is
/// refused with 400 and left untouched.
pub async fn start_processing(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<StartRunResponse>)> {
    require_project(&state, project_id).await?;
    // Refuse up front rather than claiming the project only to fail it
    if db::products::list_products(&state.db, project_id).await?.is_empty() {
        return Err(RunError::NoProducts(project_id).into());
    }

    let collaborators = state
        .collaborators
        .collaborators(&state.db)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let runner = state.runner(collaborators);

    // Claim and registration happen under one lock so abandon never sees a
    // claimed project without its live run
    let mut active_runs = state.active_runs.write().await;
    let ticket = runner.begin_run(project_id).await?;
    let started_at = ticket.started_at;
    let cancel = tokio_util::sync::CancellationToken::new();
    active_runs.insert(
        project_id,
        ActiveRun {
            started_at,
            cancel: cancel.clone(),
        },
    );
    drop(active_runs);

    let state_clone = state.clone();
    tokio::spawn(async move {
        tracing::info!(project_id = %project_id, "Background project run started");

        match runner.execute(ticket, cancel).await {
            Ok(RunOutcome::Finished(summary)) => tracing::info!(
                project_id = %project_id,
                status = %summary.status,
                duration_ms = summary.duration_ms,
                "Background project run finished"
            ),
            Ok(RunOutcome::Cancelled(_)) => {
                tracing::info!(project_id = %project_id, "Background project run cancelled")
            }
            Err(e) => {
                tracing::error!(project_id = %project_id, error = %e, "Background project run failed");
                state_clone
                    .record_error(format!("Project {} run failed: {}", project_id, e))
                    .await;
            }
        }

        // Only drop our own registration; a newer run may already be registered
        let mut active_runs = state_clone.active_runs.write().await;
        if active_runs
            .get(&project_id)
            .is_some_and(|run| run.started_at == started_at)
        {
            active_runs.remove(&project_id);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(StartRunResponse {
            project_id,
            status: ProjectStatus::Processing,
            started_at,
        }),
    ))
}

/// POST /projects/:id/cancel
///
/// Takes effect at the next product boundary.
pub async fn cancel_processing(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelRunResponse>)> {
    require_project(&state, project_id).await?;

    let active_runs = state.active_runs.read().await;
    let run = active_runs
        .get(&project_id)
        .ok_or_else(|| ApiError::Conflict(format!("No active run for project {}", project_id)))?;
    run.cancel.cancel();

    tracing::info!(project_id = %project_id, "Project run cancellation requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelRunResponse {
            project_id,
            cancel_requested: true,
        }),
    ))
}

/// POST /projects/:id/abandon
///
/// Marks a project left in `processing` (cancelled run, crashed process) as
/// `failed` so it can be started again. Products the run never finished are
/// failed with it and the counters are recounted from the product rows.
pub async fn abandon_processing(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Project>> {
    let active_runs = state.active_runs.read().await;
    if active_runs.contains_key(&project_id) {
        return Err(ApiError::Conflict(format!(
            "Project {} has an active run; cancel it first",
            project_id
        )));
    }

    abandon_run(&state.db, &state.event_bus, project_id).await?;
    drop(active_runs);
    Ok(Json(require_project(&state, project_id).await?))
}

/// Build project routes
pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/projects", post(create_project).get(list_projects))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id/products", post(add_product).get(list_products))
        .route("/projects/:id/process", post(start_processing))
        .route("/projects/:id/cancel", post(cancel_processing))
        .route("/projects/:id/abandon", post(abandon_processing))
}
