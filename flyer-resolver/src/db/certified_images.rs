//! Certified image bank database operations

use chrono::{DateTime, Utc};
use flyer_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp, parse_uuid, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::models::{CertifiedImage, NewCertifiedImage};
use crate::services::normalizer::{normalize, product_name_from_filename};
use crate::utils::retry_on_lock;

const CERTIFIED_IMAGE_COLUMNS: &str = r#"
    id, product_name, normalized_name, image_url, category, description,
    usage_count, last_used_at, created_at
"#;

fn row_to_certified_image(row: &SqliteRow) -> Result<CertifiedImage> {
    let id: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(CertifiedImage {
        id: parse_uuid(&id, "certified_images.id")?,
        product_name: row.try_get("product_name")?,
        normalized_name: row.try_get("normalized_name")?,
        image_url: row.try_get("image_url")?,
        category: row.try_get("category")?,
        description: row.try_get("description")?,
        usage_count: row.try_get("usage_count")?,
        last_used_at: parse_optional_timestamp(row.try_get("last_used_at")?, "last_used_at")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}

/// Register a certified image
///
/// The display name comes from `product_name`, or is derived from `filename`
/// when only the uploaded file name is known. The normalized key is always
/// derived here.
pub async fn insert_certified_image(
    pool: &SqlitePool,
    new_image: NewCertifiedImage,
) -> Result<CertifiedImage> {
    let product_name = new_image
        .product_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| new_image.filename.as_deref().map(product_name_from_filename))
        .unwrap_or_default();

    let normalized_name = normalize(&product_name);
    if normalized_name.is_empty() {
        return Err(Error::InvalidInput(
            "Certified image needs a product name or filename with letters or digits".to_string(),
        ));
    }
    if new_image.image_url.trim().is_empty() {
        return Err(Error::InvalidInput("Certified image URL must not be empty".to_string()));
    }

    let image = CertifiedImage {
        id: Uuid::new_v4(),
        product_name,
        normalized_name,
        image_url: new_image.image_url.trim().to_string(),
        category: new_image.category,
        description: new_image.description,
        usage_count: 0,
        last_used_at: None,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO certified_images (
            id, product_name, normalized_name, image_url, category, description,
            usage_count, last_used_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, 0, NULL, ?)
        "#,
    )
    .bind(image.id.to_string())
    .bind(&image.product_name)
    .bind(&image.normalized_name)
    .bind(&image.image_url)
    .bind(&image.category)
    .bind(&image.description)
    .bind(image.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(image)
}

pub async fn load_certified_image(pool: &SqlitePool, image_id: Uuid) -> Result<Option<CertifiedImage>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM certified_images WHERE id = ?",
        CERTIFIED_IMAGE_COLUMNS
    ))
    .bind(image_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_certified_image).transpose()
}

/// Snapshot of the whole bank in a stable order (oldest first)
pub async fn list_certified_images(pool: &SqlitePool) -> Result<Vec<CertifiedImage>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM certified_images ORDER BY created_at ASC, id ASC",
        CERTIFIED_IMAGE_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_certified_image).collect()
}

/// Count one use of a certified image
///
/// A single UPDATE evaluated by SQLite, so concurrent runs hitting the same
/// image never lose an increment.
pub async fn record_usage(pool: &SqlitePool, image_id: Uuid, used_at: DateTime<Utc>) -> Result<()> {
    let id = image_id.to_string();
    let used_at = used_at.to_rfc3339();

    let rows_affected = retry_on_lock("record_certified_image_usage", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            "UPDATE certified_images SET usage_count = usage_count + 1, last_used_at = ? WHERE id = ?",
        )
        .bind(&used_at)
        .bind(&id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    })
    .await?;

    if rows_affected == 0 {
        return Err(Error::NotFound(format!("Certified image not found: {}", image_id)));
    }
    Ok(())
}

/// Returns `false` when no such image existed
pub async fn delete_certified_image(pool: &SqlitePool, image_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM certified_images WHERE id = ?")
        .bind(image_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}
