//! Project database operations
//!
//! Status changes that guard run exclusivity are compare-and-set updates, so two
//! callers racing to start the same project cannot both succeed.

use chrono::{DateTime, Utc};
use flyer_common::events::ProjectCounters;
use flyer_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp, parse_uuid, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::models::{NewProject, Project, ProjectStatus, ProjectStatusCounts};
use crate::utils::retry_on_lock;

const PROJECT_COLUMNS: &str = r#"
    id, name, description, status,
    total_products, products_completed, products_from_bank, products_from_web, products_failed,
    error_message, processing_started_at, processing_finished_at, created_at
"#;

fn row_to_project(row: &SqliteRow) -> Result<Project> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Project {
        id: parse_uuid(&id, "projects.id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        status: status.parse().map_err(Error::Internal)?,
        counters: ProjectCounters {
            total_products: row.try_get::<i64, _>("total_products")? as u32,
            products_completed: row.try_get::<i64, _>("products_completed")? as u32,
            products_from_bank: row.try_get::<i64, _>("products_from_bank")? as u32,
            products_from_web: row.try_get::<i64, _>("products_from_web")? as u32,
            products_failed: row.try_get::<i64, _>("products_failed")? as u32,
        },
        error_message: row.try_get("error_message")?,
        processing_started_at: parse_optional_timestamp(
            row.try_get("processing_started_at")?,
            "processing_started_at",
        )?,
        processing_finished_at: parse_optional_timestamp(
            row.try_get("processing_finished_at")?,
            "processing_finished_at",
        )?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}

/// Insert a new project in `draft`
pub async fn create_project(pool: &SqlitePool, new_project: NewProject) -> Result<Project> {
    let name = new_project.name.trim().to_string();
    if name.is_empty() {
        return Err(Error::InvalidInput("Project name must not be empty".to_string()));
    }

    let project = Project {
        id: Uuid::new_v4(),
        name,
        description: new_project.description,
        status: ProjectStatus::Draft,
        counters: ProjectCounters::default(),
        error_message: None,
        processing_started_at: None,
        processing_finished_at: None,
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO projects (id, name, description, status, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(project.id.to_string())
    .bind(&project.name)
    .bind(&project.description)
    .bind(project.status.as_str())
    .bind(project.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(project)
}

/// Load project by id
pub async fn load_project(pool: &SqlitePool, project_id: Uuid) -> Result<Option<Project>> {
    let row = sqlx::query(&format!("SELECT {} FROM projects WHERE id = ?", PROJECT_COLUMNS))
        .bind(project_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_project).transpose()
}

/// All projects, newest first
pub async fn list_projects(pool: &SqlitePool) -> Result<Vec<Project>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM projects ORDER BY created_at DESC",
        PROJECT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_project).collect()
}

/// Compare-and-set the project into `processing`
///
/// Resets counters and timestamps for the new run and puts every product of
/// the project back to `pending` in the same transaction. Returns `false` when
/// the project does not exist or is already `processing`; nothing is written
/// in either case.
pub async fn try_begin_processing(
    pool: &SqlitePool,
    project_id: Uuid,
    started_at: DateTime<Utc>,
) -> Result<bool> {
    let id = project_id.to_string();
    let started_at = started_at.to_rfc3339();

    let claimed = retry_on_lock("begin_processing", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE projects SET
                status = 'processing',
                total_products = 0,
                products_completed = 0,
                products_from_bank = 0,
                products_from_web = 0,
                products_failed = 0,
                error_message = NULL,
                processing_started_at = ?,
                processing_finished_at = NULL
            WHERE id = ? AND status <> 'processing'
            "#,
        )
        .bind(&started_at)
        .bind(&id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if claimed {
            sqlx::query(
                r#"
                UPDATE products SET status = 'pending', image_url = NULL, image_source = NULL, error_message = NULL
                WHERE project_id = ?
                "#,
            )
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(claimed)
    })
    .await?;

    Ok(claimed)
}

fn not_processing(project_id: Uuid) -> Error {
    Error::Conflict(format!("Project {} is not processing", project_id))
}

/// Persist running counters of an in-progress run
///
/// Refused with [`Error::Conflict`] once the project has left `processing`,
/// so a run that was abandoned underneath cannot write stale counters.
pub async fn update_counters(
    pool: &SqlitePool,
    project_id: Uuid,
    counters: &ProjectCounters,
) -> Result<()> {
    let id = project_id.to_string();

    let rows_affected = retry_on_lock("update_project_counters", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE projects SET
                total_products = ?,
                products_completed = ?,
                products_from_bank = ?,
                products_from_web = ?,
                products_failed = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(counters.total_products as i64)
        .bind(counters.products_completed as i64)
        .bind(counters.products_from_bank as i64)
        .bind(counters.products_from_web as i64)
        .bind(counters.products_failed as i64)
        .bind(&id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    })
    .await?;

    if rows_affected == 0 {
        return Err(not_processing(project_id));
    }
    Ok(())
}

/// Record the terminal status and final counters of a run
///
/// Only a `processing` project can be finished. `error_message` is only set
/// for structural failures.
pub async fn finish_processing(
    pool: &SqlitePool,
    project_id: Uuid,
    status: ProjectStatus,
    counters: &ProjectCounters,
    error_message: Option<&str>,
    finished_at: DateTime<Utc>,
) -> Result<()> {
    let id = project_id.to_string();
    let finished_at = finished_at.to_rfc3339();

    let rows_affected = retry_on_lock("finish_processing", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE projects SET
                status = ?,
                total_products = ?,
                products_completed = ?,
                products_from_bank = ?,
                products_from_web = ?,
                products_failed = ?,
                error_message = ?,
                processing_finished_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(status.as_str())
        .bind(counters.total_products as i64)
        .bind(counters.products_completed as i64)
        .bind(counters.products_from_bank as i64)
        .bind(counters.products_from_web as i64)
        .bind(counters.products_failed as i64)
        .bind(error_message)
        .bind(&finished_at)
        .bind(&id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    })
    .await?;

    if rows_affected == 0 {
        return Err(not_processing(project_id));
    }
    Ok(())
}

/// Compare-and-set a `processing` project to `failed`
///
/// In one transaction: every product that has not reached a terminal status
/// is failed with `reason`, and the project counters are recounted from the
/// product rows, so `completed + failed == total` holds afterwards. Returns
/// `false` when the project is not in `processing`.
pub async fn abandon_processing(
    pool: &SqlitePool,
    project_id: Uuid,
    reason: &str,
    finished_at: DateTime<Utc>,
) -> Result<bool> {
    let id = project_id.to_string();
    let finished_at = finished_at.to_rfc3339();

    retry_on_lock("abandon_processing", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE projects SET status = 'failed', error_message = ?, processing_finished_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(reason)
        .bind(&finished_at)
        .bind(&id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !claimed {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE products SET status = 'failed', image_url = NULL, image_source = NULL, error_message = ?
            WHERE project_id = ? AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(reason)
        .bind(&id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE projects SET
                total_products = (SELECT COUNT(*) FROM products WHERE project_id = ?),
                products_completed = (SELECT COUNT(*) FROM products WHERE project_id = ? AND status = 'completed'),
                products_from_bank = (SELECT COUNT(*) FROM products
                    WHERE project_id = ? AND status = 'completed' AND image_source = 'certified_bank'),
                products_from_web = (SELECT COUNT(*) FROM products
                    WHERE project_id = ? AND status = 'completed' AND image_source = 'web_validated'),
                products_failed = (SELECT COUNT(*) FROM products WHERE project_id = ? AND status = 'failed')
            WHERE id = ?
            "#,
        )
        .bind(&id)
        .bind(&id)
        .bind(&id)
        .bind(&id)
        .bind(&id)
        .bind(&id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    })
    .await
}

/// Number of projects in each status
///
/// Statuses without projects are reported as zero.
pub async fn count_by_status(pool: &SqlitePool) -> Result<ProjectStatusCounts> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM projects GROUP BY status")
        .fetch_all(pool)
        .await?;

    let mut counts = ProjectStatusCounts::default();
    for row in &rows {
        let status: String = row.try_get("status")?;
        let n = row.try_get::<i64, _>("n")? as u64;
        match status.parse().map_err(Error::Internal)? {
            ProjectStatus::Draft => counts.draft = n,
            ProjectStatus::Processing => counts.processing = n,
            ProjectStatus::Completed => counts.completed = n,
            ProjectStatus::Failed => counts.failed = n,
        }
    }
    Ok(counts)
}
