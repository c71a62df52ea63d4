//! Configuration resolution for flyer-resolver
//!
//! Collaborator credentials resolve with Database → ENV → TOML priority.
//! Resolution thresholds come from the `[resolver]` TOML table.

use flyer_common::config::{ResolverSettings, TomlConfig};
use flyer_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::settings::{GEMINI_API_KEY, GOOGLE_API_KEY, GOOGLE_SEARCH_ENGINE_ID};
use crate::services::{GeminiImageValidator, GoogleImageSearchClient};
use crate::Collaborators;

pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 0.8;
pub const DEFAULT_MAX_CANDIDATES: usize = 5;
pub const DEFAULT_PRODUCT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_VALIDATION_TIMEOUT_SECS: u64 = 45;

/// Tunables of the per-product resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// A valid verdict at or above this confidence ends validation early
    pub acceptance_threshold: f64,
    pub max_candidates: usize,
    /// Budget for one product across all collaborator calls
    pub product_timeout: Duration,
    pub search_timeout: Duration,
    pub validation_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            product_timeout: Duration::from_secs(DEFAULT_PRODUCT_TIMEOUT_SECS),
            search_timeout: Duration::from_secs(DEFAULT_SEARCH_TIMEOUT_SECS),
            validation_timeout: Duration::from_secs(DEFAULT_VALIDATION_TIMEOUT_SECS),
        }
    }
}

impl ResolverConfig {
    /// Apply TOML overrides on top of the defaults
    pub fn from_settings(settings: &ResolverSettings) -> Result<Self> {
        let defaults = Self::default();

        let acceptance_threshold = settings
            .acceptance_threshold
            .unwrap_or(defaults.acceptance_threshold);
        if !(0.0..=1.0).contains(&acceptance_threshold) {
            return Err(Error::Config(format!(
                "resolver.acceptance_threshold must be within [0, 1], got {}",
                acceptance_threshold
            )));
        }

        let max_candidates = settings.max_candidates.unwrap_or(defaults.max_candidates);
        if max_candidates == 0 {
            return Err(Error::Config("resolver.max_candidates must be at least 1".to_string()));
        }

        let seconds = |value: Option<u64>, default: Duration, field: &str| -> Result<Duration> {
            match value {
                Some(0) => Err(Error::Config(format!("resolver.{} must be positive", field))),
                Some(secs) => Ok(Duration::from_secs(secs)),
                None => Ok(default),
            }
        };

        Ok(Self {
            acceptance_threshold,
            max_candidates,
            product_timeout: seconds(
                settings.product_timeout_secs,
                defaults.product_timeout,
                "product_timeout_secs",
            )?,
            search_timeout: seconds(
                settings.search_timeout_secs,
                defaults.search_timeout,
                "search_timeout_secs",
            )?,
            validation_timeout: seconds(
                settings.validation_timeout_secs,
                defaults.validation_timeout,
                "validation_timeout_secs",
            )?,
        })
    }
}

/// One collaborator credential and where each tier looks for it
#[derive(Debug, Clone, Copy)]
pub struct Credential {
    pub label: &'static str,
    pub setting_key: &'static str,
    pub env_var: &'static str,
    toml_value: fn(&TomlConfig) -> Option<&String>,
}

fn toml_google_api_key(config: &TomlConfig) -> Option<&String> {
    config.google_api_key.as_ref()
}

fn toml_google_search_engine_id(config: &TomlConfig) -> Option<&String> {
    config.google_search_engine_id.as_ref()
}

fn toml_gemini_api_key(config: &TomlConfig) -> Option<&String> {
    config.gemini_api_key.as_ref()
}

pub const GOOGLE_API_KEY_CREDENTIAL: Credential = Credential {
    label: "Google API key",
    setting_key: GOOGLE_API_KEY,
    env_var: "FLYER_GOOGLE_API_KEY",
    toml_value: toml_google_api_key,
};

pub const GOOGLE_SEARCH_ENGINE_CREDENTIAL: Credential = Credential {
    label: "Google search engine id",
    setting_key: GOOGLE_SEARCH_ENGINE_ID,
    env_var: "FLYER_GOOGLE_SEARCH_ENGINE_ID",
    toml_value: toml_google_search_engine_id,
};

pub const GEMINI_API_KEY_CREDENTIAL: Credential = Credential {
    label: "Gemini API key",
    setting_key: GEMINI_API_KEY,
    env_var: "FLYER_GEMINI_API_KEY",
    toml_value: toml_gemini_api_key,
};

/// Resolve a credential from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML
pub async fn resolve_credential(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
    credential: Credential,
) -> Result<String> {
    let db_value = crate::db::settings::get_credential(db, credential.setting_key)
        .await?
        .filter(|v| is_valid_key(v));
    let env_value = std::env::var(credential.env_var).ok().filter(|v| is_valid_key(v));
    let toml_value = (credential.toml_value)(toml_config)
        .filter(|v| is_valid_key(v))
        .cloned();

    let sources: Vec<&str> = [
        db_value.as_ref().map(|_| "database"),
        env_value.as_ref().map(|_| "environment"),
        toml_value.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "{} found in multiple sources: {}. Using {} (highest priority).",
            credential.label,
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(value) = db_value {
        info!("{} loaded from database", credential.label);
        return Ok(value);
    }
    if let Some(value) = env_value {
        info!("{} loaded from environment variable", credential.label);
        return Ok(value);
    }
    if let Some(value) = toml_value {
        info!("{} loaded from TOML config", credential.label);
        return Ok(value);
    }

    Err(Error::Config(format!(
        "{} not configured. Set it with one of:\n\
         1. Settings API: PUT /settings/{}\n\
         2. Environment: {}=...\n\
         3. TOML config: {} = \"...\"",
        credential.label, credential.setting_key, credential.env_var, credential.setting_key
    )))
}

/// Build the Google search and Gemini validation clients
///
/// Fails with a config error naming the first missing credential.
pub async fn build_collaborators(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<Collaborators> {
    let api_key = resolve_credential(db, toml_config, GOOGLE_API_KEY_CREDENTIAL).await?;
    let search_engine_id = resolve_credential(db, toml_config, GOOGLE_SEARCH_ENGINE_CREDENTIAL).await?;
    let gemini_key = resolve_credential(db, toml_config, GEMINI_API_KEY_CREDENTIAL).await?;

    let search = GoogleImageSearchClient::new(api_key, search_engine_id)
        .map_err(|e| Error::Config(format!("Image search client: {}", e)))?;
    let validator = GeminiImageValidator::new(gemini_key)
        .map_err(|e| Error::Config(format!("Image validator client: {}", e)))?;

    Ok(Collaborators {
        search: Arc::new(search),
        validator: Arc::new(validator),
    })
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
