//! Database Test Utilities

use flyer_resolver::db;
use flyer_resolver::models::{CertifiedImage, NewCertifiedImage, NewProduct, NewProject, Product};
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

/// File-backed database with a real multi-connection pool
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_file_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pool = db::init_database_pool(&temp_dir.path().join("flyer.db"))
        .await
        .expect("Failed to open test database");
    (temp_dir, pool)
}

pub async fn create_project(pool: &SqlitePool, name: &str) -> Uuid {
    db::projects::create_project(
        pool,
        NewProject {
            name: name.to_string(),
            description: None,
        },
    )
    .await
    .expect("Failed to create project")
    .id
}

/// Append products (name, description) in order
pub async fn add_products(pool: &SqlitePool, project_id: Uuid, products: &[(&str, Option<&str>)]) -> Vec<Product> {
    let mut added = Vec::new();
    for (name, description) in products {
        added.push(
            db::products::add_product(
                pool,
                project_id,
                NewProduct {
                    name: name.to_string(),
                    description: description.map(str::to_string),
                    price: 10.0,
                    position: None,
                },
            )
            .await
            .expect("Failed to add product"),
        );
    }
    added
}

pub async fn insert_certified(pool: &SqlitePool, product_name: &str, image_url: &str) -> CertifiedImage {
    db::certified_images::insert_certified_image(
        pool,
        NewCertifiedImage {
            product_name: Some(product_name.to_string()),
            filename: None,
            image_url: image_url.to_string(),
            category: None,
            description: None,
        },
    )
    .await
    .expect("Failed to insert certified image")
}
