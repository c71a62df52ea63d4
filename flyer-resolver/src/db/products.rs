//! Product database operations
//!
//! Each resolution step is its own committed write so observers see progress
//! product by product.

use chrono::Utc;
use flyer_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::models::{ImageSource, NewProduct, Product, ProductStatus};
use crate::utils::retry_on_lock;

const PRODUCT_COLUMNS: &str = r#"
    id, project_id, name, description, price, position,
    status, image_url, image_source, error_message, created_at
"#;

fn row_to_product(row: &SqliteRow) -> Result<Product> {
    let id: String = row.try_get("id")?;
    let project_id: String = row.try_get("project_id")?;
    let status: String = row.try_get("status")?;
    let image_source: Option<String> = row.try_get("image_source")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Product {
        id: parse_uuid(&id, "products.id")?,
        project_id: parse_uuid(&project_id, "products.project_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        position: row.try_get("position")?,
        status: status.parse().map_err(Error::Internal)?,
        image_url: row.try_get("image_url")?,
        image_source: image_source
            .map(|s| s.parse::<ImageSource>())
            .transpose()
            .map_err(Error::Internal)?,
        error_message: row.try_get("error_message")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}

/// Add a product to a project
///
/// Without an explicit position the product is appended after the current last one.
pub async fn add_product(pool: &SqlitePool, project_id: Uuid, new_product: NewProduct) -> Result<Product> {
    let name = new_product.name.trim().to_string();
    if name.is_empty() {
        return Err(Error::InvalidInput("Product name must not be empty".to_string()));
    }
    if !new_product.price.is_finite() || new_product.price < 0.0 {
        return Err(Error::InvalidInput(format!(
            "Product price must be a nonnegative number, got {}",
            new_product.price
        )));
    }

    let position = match new_product.position {
        Some(position) => position,
        None => {
            let max: Option<i64> =
                sqlx::query_scalar("SELECT MAX(position) FROM products WHERE project_id = ?")
                    .bind(project_id.to_string())
                    .fetch_one(pool)
                    .await?;
            max.map(|p| p + 1).unwrap_or(0)
        }
    };

    let product = Product {
        id: Uuid::new_v4(),
        project_id,
        name,
        description: new_product
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        price: new_product.price,
        position,
        status: ProductStatus::Pending,
        image_url: None,
        image_source: None,
        error_message: None,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO products (id, project_id, name, description, price, position, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(product.id.to_string())
    .bind(project_id.to_string())
    .bind(&product.name)
    .bind(&product.description)
    .bind(product.price)
    .bind(product.position)
    .bind(product.status.as_str())
    .bind(product.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(product)
}

pub async fn load_product(pool: &SqlitePool, product_id: Uuid) -> Result<Option<Product>> {
    let row = sqlx::query(&format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS))
        .bind(product_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_product).transpose()
}

/// All products of a project in run order (position, then insertion)
pub async fn list_products(pool: &SqlitePool, project_id: Uuid) -> Result<Vec<Product>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM products WHERE project_id = ? ORDER BY position ASC, created_at ASC, id ASC",
        PRODUCT_COLUMNS
    ))
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_product).collect()
}

/// Write `status` and the resolution fields, provided the product's current
/// status may move to `status`
///
/// A refused transition is an [`Error::Conflict`]; the row is left as it was.
async fn execute_update(
    pool: &SqlitePool,
    operation: &str,
    product_id: Uuid,
    status: ProductStatus,
    image_url: Option<&str>,
    image_source: Option<ImageSource>,
    error_message: Option<&str>,
) -> Result<()> {
    let allowed_from = ProductStatus::predecessors(status);
    if allowed_from.is_empty() {
        return Err(Error::Internal(format!("No transition leads to {}", status)));
    }
    let sql = format!(
        "UPDATE products SET status = ?, image_url = ?, image_source = ?, error_message = ? \
         WHERE id = ? AND status IN ({})",
        allowed_from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let id = product_id.to_string();
    let image_source = image_source.map(|s| s.as_str());

    let rows_affected = retry_on_lock(operation, DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(image_url)
            .bind(image_source)
            .bind(error_message)
            .bind(&id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    })
    .await?;

    if rows_affected == 0 {
        let current: Option<String> = sqlx::query_scalar("SELECT status FROM products WHERE id = ?")
            .bind(&id)
            .fetch_optional(pool)
            .await?;
        return Err(match current {
            None => Error::NotFound(format!("Product not found: {}", product_id)),
            Some(current) => Error::Conflict(format!(
                "Product {} cannot move from {} to {}",
                product_id, current, status
            )),
        });
    }
    Ok(())
}

/// Start resolving a `pending` product: `searching_bank` with image and error fields cleared
pub async fn begin_resolution(pool: &SqlitePool, product_id: Uuid) -> Result<()> {
    execute_update(
        pool,
        "begin_resolution",
        product_id,
        ProductStatus::SearchingBank,
        None,
        None,
        None,
    )
    .await
}

/// Move to an intermediate (non-terminal) status
pub async fn set_status(pool: &SqlitePool, product_id: Uuid, status: ProductStatus) -> Result<()> {
    if status.is_terminal() {
        return Err(Error::Internal(format!(
            "set_status cannot write terminal status {}",
            status
        )));
    }
    execute_update(pool, "set_product_status", product_id, status, None, None, None)
        .await
}

/// Commit a resolved image and mark `completed`
pub async fn complete(
    pool: &SqlitePool,
    product_id: Uuid,
    image_url: &str,
    source: ImageSource,
) -> Result<()> {
    execute_update(
        pool,
        "complete_product",
        product_id,
        ProductStatus::Completed,
        Some(image_url),
        Some(source),
        None,
    )
    .await
}

/// Mark `failed` with a diagnostic message
pub async fn fail(pool: &SqlitePool, product_id: Uuid, error_message: &str) -> Result<()> {
    execute_update(
        pool,
        "fail_product",
        product_id,
        ProductStatus::Failed,
        None,
        None,
        Some(error_message),
    )
    .await
}
