//! Database access for flyer-resolver
//!
//! SQLite is the persistence collaborator: every write the resolver makes goes
//! through these modules and is committed immediately.

pub mod certified_images;
pub mod products;
pub mod projects;
pub mod settings;

use anyhow::Result;
use chrono::{DateTime, Utc};
use flyer_common::Error;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

/// Default budget for retrying writes that hit `database is locked`
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Initialize database connection pool
///
/// Creates the database file (and parent directory) when missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the schema applied
///
/// Every SQLite `:memory:` connection is its own database, so the pool is
/// pinned to one connection that never expires.
pub async fn create_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create the resolver tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'draft',
            total_products INTEGER NOT NULL DEFAULT 0,
            products_completed INTEGER NOT NULL DEFAULT 0,
            products_from_bank INTEGER NOT NULL DEFAULT 0,
            products_from_web INTEGER NOT NULL DEFAULT 0,
            products_failed INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            processing_started_at TEXT,
            processing_finished_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id),
            name TEXT NOT NULL,
            description TEXT,
            price REAL NOT NULL DEFAULT 0 CHECK (price >= 0),
            position INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            image_url TEXT,
            image_source TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_products_project_position ON products(project_id, position)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS certified_images (
            id TEXT PRIMARY KEY,
            product_name TEXT NOT NULL,
            normalized_name TEXT NOT NULL,
            image_url TEXT NOT NULL,
            category TEXT,
            description TEXT,
            usage_count INTEGER NOT NULL DEFAULT 0,
            last_used_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_certified_images_normalized ON certified_images(normalized_name)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (settings, projects, products, certified_images)");

    Ok(())
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> flyer_common::Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> flyer_common::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
    column: &str,
) -> flyer_common::Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_timestamp(&s, column)).transpose()
}
