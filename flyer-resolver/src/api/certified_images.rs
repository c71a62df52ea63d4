//! Certified image bank API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use flyer_common::events::FlyerEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db,
    error::{ApiError, ApiResult},
    models::{CertifiedImage, NewCertifiedImage},
    AppState,
};

/// POST /certified-images/bulk request
#[derive(Debug, Deserialize)]
pub struct BulkInsertRequest {
    pub images: Vec<NewCertifiedImage>,
}

/// Entry that could not be registered, by position in the request
#[derive(Debug, Serialize)]
pub struct BulkInsertFailure {
    pub index: usize,
    pub message: String,
}

/// POST /certified-images/bulk response
#[derive(Debug, Serialize)]
pub struct BulkInsertResponse {
    pub created: Vec<CertifiedImage>,
    pub failed: Vec<BulkInsertFailure>,
}

/// GET /certified-images
pub async fn list_certified_images(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<CertifiedImage>>> {
    Ok(Json(db::certified_images::list_certified_images(&state.db).await?))
}

/// POST /certified-images
pub async fn create_certified_image(
    State(state): State<AppState>,
    Json(request): Json<NewCertifiedImage>,
) -> ApiResult<(StatusCode, Json<CertifiedImage>)> {
    let image = db::certified_images::insert_certified_image(&state.db, request).await?;
    state
        .event_bus
        .emit_lossy(FlyerEvent::row_changed("certified_images", image.id));

    tracing::info!(
        certified_image_id = %image.id,
        product_name = %image.product_name,
        "Certified image registered"
    );
    Ok((StatusCode::CREATED, Json(image)))
}

/// POST /certified-images/bulk
///
/// Entries are independent: invalid ones are reported and the rest are kept.
pub async fn bulk_create_certified_images(
    State(state): State<AppState>,
    Json(request): Json<BulkInsertRequest>,
) -> ApiResult<Json<BulkInsertResponse>> {
    if request.images.is_empty() {
        return Err(ApiError::BadRequest("No images in request".to_string()));
    }

    let mut created = Vec::new();
    let mut failed = Vec::new();

    for (index, new_image) in request.images.into_iter().enumerate() {
        match db::certified_images::insert_certified_image(&state.db, new_image).await {
            Ok(image) => {
                state
                    .event_bus
                    .emit_lossy(FlyerEvent::row_changed("certified_images", image.id));
                created.push(image);
            }
            Err(flyer_common::Error::InvalidInput(message)) => {
                failed.push(BulkInsertFailure { index, message });
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(created = created.len(), failed = failed.len(), "Bulk certified image upload");
    Ok(Json(BulkInsertResponse { created, failed }))
}

/// DELETE /certified-images/:id
pub async fn delete_certified_image(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !db::certified_images::delete_certified_image(&state.db, image_id).await? {
        return Err(ApiError::NotFound(format!("Certified image not found: {}", image_id)));
    }

    state
        .event_bus
        .emit_lossy(FlyerEvent::row_changed("certified_images", image_id));
    Ok(StatusCode::NO_CONTENT)
}

/// Build certified image routes
pub fn certified_image_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/certified-images",
            get(list_certified_images).post(create_certified_image),
        )
        .route("/certified-images/bulk", post(bulk_create_certified_images))
        .route("/certified-images/:id", delete(delete_certified_image))
}
