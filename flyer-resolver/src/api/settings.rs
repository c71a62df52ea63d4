//! Settings API endpoint
//!
//! Stores collaborator credentials in the database (authoritative) and
//! mirrors them to the TOML config when one is known.

use crate::config::{
    is_valid_key, resolve_credential, GEMINI_API_KEY_CREDENTIAL, GOOGLE_API_KEY_CREDENTIAL,
    GOOGLE_SEARCH_ENGINE_CREDENTIAL,
};
use crate::db::settings::{CREDENTIAL_KEYS, GEMINI_API_KEY, GOOGLE_API_KEY, GOOGLE_SEARCH_ENGINE_ID};
use crate::{ApiError, ApiResult, AppState, CollaboratorSource};
use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use flyer_common::config::{load_toml_config, write_toml_config, TomlConfig};
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;
use tracing::{info, warn};

/// PUT /settings/:key request
#[derive(Debug, Deserialize)]
pub struct SetCredentialRequest {
    pub value: String,
}

/// Whether a credential resolves from any tier; the value is never returned
#[derive(Debug, Serialize)]
pub struct CredentialStatus {
    pub key: &'static str,
    pub configured: bool,
}

/// GET /settings
pub async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<Vec<CredentialStatus>>> {
    let toml_config = match &state.collaborators {
        CollaboratorSource::Configured(toml_config) => (**toml_config).clone(),
        CollaboratorSource::Fixed(_) => TomlConfig::default(),
    };

    let mut statuses = Vec::new();
    for credential in [
        GOOGLE_API_KEY_CREDENTIAL,
        GOOGLE_SEARCH_ENGINE_CREDENTIAL,
        GEMINI_API_KEY_CREDENTIAL,
    ] {
        let configured = match resolve_credential(&state.db, &toml_config, credential).await {
            Ok(_) => true,
            Err(flyer_common::Error::Config(_)) => false,
            Err(e) => return Err(e.into()),
        };
        statuses.push(CredentialStatus {
            key: credential.setting_key,
            configured,
        });
    }

    Ok(Json(statuses))
}

/// PUT /settings/:key
///
/// **Errors:**
/// - 400 Bad Request: unknown key, empty or whitespace-only value
/// - 500 Internal Server Error: database write failure
///
/// TOML write failures log warnings but do not fail the request.
pub async fn set_credential(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<SetCredentialRequest>,
) -> ApiResult<Json<CredentialStatus>> {
    let Some(key) = CREDENTIAL_KEYS.iter().copied().find(|k| *k == key) else {
        return Err(ApiError::BadRequest(format!("Unknown setting: {}", key)));
    };
    if !is_valid_key(&payload.value) {
        return Err(ApiError::BadRequest(
            "Value cannot be empty or whitespace-only".to_string(),
        ));
    }

    crate::db::settings::set_credential(&state.db, key, payload.value.clone()).await?;
    info!("Setting {} updated via API", key);

    if let Some(path) = &state.config_path {
        if let Err(e) = sync_credential_to_toml(path, key, payload.value) {
            warn!("TOML sync failed (database write succeeded): {}", e);
        }
    }

    Ok(Json(CredentialStatus {
        key,
        configured: true,
    }))
}

fn sync_credential_to_toml(path: &FsPath, key: &str, value: String) -> flyer_common::Result<()> {
    let mut config = load_toml_config(path)?;
    match key {
        GOOGLE_API_KEY => config.google_api_key = Some(value),
        GOOGLE_SEARCH_ENGINE_ID => config.google_search_engine_id = Some(value),
        GEMINI_API_KEY => config.gemini_api_key = Some(value),
        _ => return Ok(()),
    }
    write_toml_config(&config, path)?;
    info!("Settings synced to TOML: {}", path.display());
    Ok(())
}

/// Build settings routes
pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/settings", get(get_settings))
        .route("/settings/:key", put(set_credential))
}
