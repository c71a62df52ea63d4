//! Project runner
//!
//! Runs every product of a project through the [`ResolutionOrchestrator`]
//! one at a time and keeps the project's aggregate counters current.
//!
//! A run is split in two so the HTTP layer can answer 404/409 before the
//! work moves to a background task:
//! - [`ProjectRunner::begin_run`] claims the project (compare-and-set to `processing`)
//! - [`ProjectRunner::execute`] processes the products and finalizes the project

use chrono::{DateTime, Utc};
use flyer_common::events::{EventBus, FlyerEvent, ProjectCounters};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ResolverConfig;
use crate::db;
use crate::models::{CertifiedImage, Product, ProjectStatus, RunSummary};
use crate::services::image_search::ImageSearch;
use crate::services::image_validator::ImageValidator;
use crate::services::resolution_orchestrator::{ProductResolution, ResolutionOrchestrator};

const NO_PRODUCTS: &str = "No products found for this project";

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Project not found: {0}")]
    NotFound(Uuid),

    #[error("Project {0} is already processing")]
    PreconditionFailed(Uuid),

    #[error("{}", NO_PRODUCTS)]
    NoProducts(Uuid),

    #[error(transparent)]
    Common(#[from] flyer_common::Error),
}

/// Claim on a project returned by [`ProjectRunner::begin_run`]
#[derive(Debug)]
pub struct RunTicket {
    pub project_id: Uuid,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl RunTicket {
    fn summary(&self, status: ProjectStatus, counters: ProjectCounters) -> RunSummary {
        RunSummary {
            project_id: self.project_id,
            status,
            counters,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Every product reached a terminal state and the project was finalized
    Finished(RunSummary),
    /// Stopped at a product boundary; the project stays `processing`
    Cancelled(RunSummary),
}

impl RunOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            RunOutcome::Finished(summary) | RunOutcome::Cancelled(summary) => summary,
        }
    }
}

pub struct ProjectRunner {
    db: SqlitePool,
    event_bus: EventBus,
    orchestrator: ResolutionOrchestrator,
}

impl ProjectRunner {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        search: Arc<dyn ImageSearch>,
        validator: Arc<dyn ImageValidator>,
        config: ResolverConfig,
    ) -> Self {
        let orchestrator =
            ResolutionOrchestrator::new(db.clone(), event_bus.clone(), search, validator, config);
        Self {
            db,
            event_bus,
            orchestrator,
        }
    }

    fn notify_project(&self, project_id: Uuid) {
        self.event_bus.emit_lossy(FlyerEvent::row_changed("projects", project_id));
    }

    /// Claim the project for a new run
    ///
    /// Counters, error message and timestamps are reset. A project already in
    /// `processing` is left exactly as it is.
    pub async fn begin_run(&self, project_id: Uuid) -> Result<RunTicket, RunError> {
        let started_at = Utc::now();
        if !db::projects::try_begin_processing(&self.db, project_id, started_at).await? {
            return match db::projects::load_project(&self.db, project_id).await? {
                None => Err(RunError::NotFound(project_id)),
                Some(_) => Err(RunError::PreconditionFailed(project_id)),
            };
        }

        self.notify_project(project_id);
        info!(project_id = %project_id, "Project run started");

        Ok(RunTicket {
            project_id,
            started_at,
            started: Instant::now(),
        })
    }

    /// Claim and process in one call
    pub async fn run(&self, project_id: Uuid, cancel: CancellationToken) -> Result<RunOutcome, RunError> {
        let ticket = self.begin_run(project_id).await?;
        self.execute(ticket, cancel).await
    }

    /// Process every product of a claimed project
    ///
    /// Per-product failures never abort the run. Errors returned from here are
    /// structural: the product list or certified bank could not be loaded, or
    /// the project row could not be written.
    pub async fn execute(&self, ticket: RunTicket, cancel: CancellationToken) -> Result<RunOutcome, RunError> {
        let project_id = ticket.project_id;

        let products = match db::products::list_products(&self.db, project_id).await {
            Ok(products) if products.is_empty() => {
                return Err(self.abort(&ticket, RunError::NoProducts(project_id)).await)
            }
            Ok(products) => products,
            Err(e) => return Err(self.abort(&ticket, e.into()).await),
        };
        let bank = match db::certified_images::list_certified_images(&self.db).await {
            Ok(bank) => bank,
            Err(e) => return Err(self.abort(&ticket, e.into()).await),
        };

        let mut counters = ProjectCounters::for_run(products.len() as u32);
        db::projects::update_counters(&self.db, project_id, &counters).await?;
        self.notify_project(project_id);
        self.event_bus.emit_lossy(FlyerEvent::ProjectProcessingStarted {
            project_id,
            total_products: counters.total_products,
            timestamp: Utc::now(),
        });

        info!(
            project_id = %project_id,
            products = products.len(),
            certified_images = bank.len(),
            "Processing products"
        );

        for product in &products {
            if cancel.is_cancelled() {
                info!(
                    project_id = %project_id,
                    processed = counters.processed(),
                    total = counters.total_products,
                    "Project run cancelled"
                );
                self.event_bus.emit_lossy(FlyerEvent::ProjectCancelled {
                    project_id,
                    counters,
                    timestamp: Utc::now(),
                });
                return Ok(RunOutcome::Cancelled(ticket.summary(ProjectStatus::Processing, counters)));
            }

            self.process_product(product, &bank, &mut counters).await;

            db::projects::update_counters(&self.db, project_id, &counters).await?;
            self.notify_project(project_id);
            self.event_bus.emit_lossy(FlyerEvent::ProjectProgress {
                project_id,
                product_id: product.id,
                counters,
                percentage: counters.percentage(),
                timestamp: Utc::now(),
            });
        }

        let status = if counters.all_failed() {
            ProjectStatus::Failed
        } else {
            ProjectStatus::Completed
        };
        db::projects::finish_processing(&self.db, project_id, status, &counters, None, Utc::now()).await?;
        self.notify_project(project_id);

        let summary = ticket.summary(status, counters);
        match status {
            ProjectStatus::Failed => self.event_bus.emit_lossy(FlyerEvent::ProjectFailed {
                project_id,
                counters,
                error: None,
                timestamp: Utc::now(),
            }),
            _ => self.event_bus.emit_lossy(FlyerEvent::ProjectCompleted {
                project_id,
                counters,
                duration_ms: summary.duration_ms,
                timestamp: Utc::now(),
            }),
        }

        info!(
            project_id = %project_id,
            status = %status,
            completed = counters.products_completed,
            from_bank = counters.products_from_bank,
            from_web = counters.products_from_web,
            failed = counters.products_failed,
            duration_ms = summary.duration_ms,
            "Project run finished"
        );

        Ok(RunOutcome::Finished(summary))
    }

    /// Resolve one product and count the outcome
    ///
    /// An error escaping the orchestrator fails this product only.
    async fn process_product(&self, product: &Product, bank: &[CertifiedImage], counters: &mut ProjectCounters) {
        match self.orchestrator.resolve(product, bank).await {
            Ok(ProductResolution::BankHit { .. }) => counters.record_bank_hit(),
            Ok(ProductResolution::WebHit { .. }) => counters.record_web_hit(),
            Ok(ProductResolution::Failed(_)) => counters.record_failure(),
            Err(e) => {
                warn!(product_id = %product.id, error = %e, "Product resolution aborted");
                let message = format!("Resolution aborted: {}", e);
                match db::products::fail(&self.db, product.id, &message).await {
                    Ok(()) => self
                        .event_bus
                        .emit_lossy(FlyerEvent::row_changed("products", product.id)),
                    Err(e) => error!(product_id = %product.id, error = %e, "Failed to mark product failed"),
                }
                counters.record_failure();
            }
        }
    }

    /// Fail the whole run before any product was processed
    async fn abort(&self, ticket: &RunTicket, cause: RunError) -> RunError {
        let project_id = ticket.project_id;
        let message = cause.to_string();
        let counters = ProjectCounters::default();

        error!(project_id = %project_id, error = %message, "Project run aborted");

        match db::projects::finish_processing(
            &self.db,
            project_id,
            ProjectStatus::Failed,
            &counters,
            Some(&message),
            Utc::now(),
        )
        .await
        {
            Ok(()) => self.notify_project(project_id),
            Err(e) => error!(project_id = %project_id, error = %e, "Failed to record aborted run"),
        }

        self.event_bus.emit_lossy(FlyerEvent::ProjectFailed {
            project_id,
            counters,
            error: Some(message),
            timestamp: Utc::now(),
        });

        cause
    }
}

/// Mark a `processing` project with no live run as `failed`
///
/// Callers must make sure no run is active for the project. Returns
/// `PreconditionFailed` when the project is not `processing`.
pub async fn abandon_run(db: &SqlitePool, event_bus: &EventBus, project_id: Uuid) -> Result<(), RunError> {
    let reason = "Run abandoned before completion";
    if !db::projects::abandon_processing(db, project_id, reason, Utc::now()).await? {
        return match db::projects::load_project(db, project_id).await? {
            None => Err(RunError::NotFound(project_id)),
            Some(_) => Err(RunError::PreconditionFailed(project_id)),
        };
    }

    for product in db::products::list_products(db, project_id).await? {
        event_bus.emit_lossy(FlyerEvent::row_changed("products", product.id));
    }
    event_bus.emit_lossy(FlyerEvent::row_changed("projects", project_id));
    if let Some(project) = db::projects::load_project(db, project_id).await? {
        event_bus.emit_lossy(FlyerEvent::ProjectFailed {
            project_id,
            counters: project.counters,
            error: project.error_message,
            timestamp: Utc::now(),
        });
    }

    info!(project_id = %project_id, "Project run abandoned");
    Ok(())
}
