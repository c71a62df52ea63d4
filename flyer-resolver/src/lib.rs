//! flyer-resolver library interface
//!
//! Exposes the resolution pipeline and the HTTP router for integration testing

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use flyer_common::config::TomlConfig;
use flyer_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::ResolverConfig;
use crate::services::{ImageSearch, ImageValidator, ProjectRunner};

/// Search and validation backends used by a run
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn ImageSearch>,
    pub validator: Arc<dyn ImageValidator>,
}

/// Where runs get their collaborators from
#[derive(Clone)]
pub enum CollaboratorSource {
    /// Same instances for every run
    Fixed(Collaborators),
    /// Google/Gemini clients built at run start from the resolved credentials,
    /// so credentials saved through the settings API apply to the next run
    Configured(Arc<TomlConfig>),
}

impl CollaboratorSource {
    pub async fn collaborators(&self, db: &SqlitePool) -> flyer_common::Result<Collaborators> {
        match self {
            CollaboratorSource::Fixed(collaborators) => Ok(collaborators.clone()),
            CollaboratorSource::Configured(toml_config) => {
                config::build_collaborators(db, toml_config).await
            }
        }
    }
}

/// A background run registered in [`AppState::active_runs`]
#[derive(Clone)]
pub struct ActiveRun {
    pub started_at: DateTime<Utc>,
    pub cancel: CancellationToken,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub collaborators: CollaboratorSource,
    pub resolver_config: ResolverConfig,
    /// Runs currently executing in this process, by project
    pub active_runs: Arc<RwLock<HashMap<Uuid, ActiveRun>>>,
    /// TOML file credentials are mirrored to (best-effort)
    pub config_path: Option<PathBuf>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        collaborators: CollaboratorSource,
        resolver_config: ResolverConfig,
    ) -> Self {
        Self {
            db,
            event_bus,
            collaborators,
            resolver_config,
            active_runs: Arc::new(RwLock::new(HashMap::new())),
            config_path: None,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Runner wired to this state's database, events and the given collaborators
    pub fn runner(&self, collaborators: Collaborators) -> ProjectRunner {
        ProjectRunner::new(
            self.db.clone(),
            self.event_bus.clone(),
            collaborators.search,
            collaborators.validator,
            self.resolver_config.clone(),
        )
    }

    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::project_routes())
        .merge(api::certified_image_routes())
        .merge(api::settings_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
