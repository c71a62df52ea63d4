//! Per-product resolution
//!
//! Drives one product through the resolution state machine:
//!
//! ```text
//! pending → searching_bank ─┬─────────────────────────────→ completed (certified_bank)
//!                           └→ searching_web → validating ─→ completed (web_validated)
//!                                     └──────────┴─────────→ failed
//! ```
//!
//! Every transition is committed before the next step starts and is followed
//! by a `RowChanged` notification. Collaborator failures and timeouts are
//! recovered here; only persistence errors leave [`ResolutionOrchestrator::resolve`].

use chrono::Utc;
use flyer_common::events::{EventBus, FlyerEvent};
use flyer_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ResolverConfig;
use crate::db;
use crate::models::{CertifiedImage, ImageSource, Product, ProductStatus};
use crate::services::bank_matcher::find_match;
use crate::services::image_search::{ImageCandidate, ImageSearch};
use crate::services::image_validator::{ImageValidator, ValidationVerdict};

const NO_IMAGES_FOUND: &str = "No images found in web search";
const DEADLINE_EXCEEDED: &str = "product deadline exceeded";

/// What happened when one candidate was put to the validator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Verdict(ValidationVerdict),
    /// Validator error or timeout; the candidate is skipped
    CollaboratorFailure { error: String },
    /// Never evaluated because the product ran out of time
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationAttempt {
    pub link: String,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for ValidationAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Verdict(v) => write!(
                f,
                "{}: valid={} confidence={} notes={}",
                self.link, v.is_valid, v.confidence, v.notes
            ),
            AttemptOutcome::CollaboratorFailure { error } => write!(f, "{}: error={}", self.link, error),
            AttemptOutcome::Skipped { reason } => write!(f, "{}: skipped: {}", self.link, reason),
        }
    }
}

/// Product-level failure, stored as the product's `error_message`
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// Search errored, timed out, or returned nothing
    NoCandidates { cause: Option<String> },
    /// Every candidate was rejected, errored, or skipped
    NoValidCandidate { attempts: Vec<ValidationAttempt> },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NoCandidates { cause: None } => f.write_str(NO_IMAGES_FOUND),
            ResolveError::NoCandidates { cause: Some(cause) } => {
                write!(f, "{} ({})", NO_IMAGES_FOUND, cause)
            }
            ResolveError::NoValidCandidate { attempts } => {
                write!(f, "No valid image among {} candidates", attempts.len())?;
                for (index, attempt) in attempts.iter().enumerate() {
                    write!(f, "\n{}. {}", index + 1, attempt)?;
                }
                Ok(())
            }
        }
    }
}

/// Terminal result of resolving one product
#[derive(Debug, Clone, PartialEq)]
pub enum ProductResolution {
    BankHit { certified_image_id: Uuid, image_url: String },
    WebHit { image_url: String, confidence: f64 },
    Failed(ResolveError),
}

impl ProductResolution {
    pub fn source(&self) -> Option<ImageSource> {
        match self {
            ProductResolution::BankHit { .. } => Some(ImageSource::CertifiedBank),
            ProductResolution::WebHit { .. } => Some(ImageSource::WebValidated),
            ProductResolution::Failed(_) => None,
        }
    }
}

/// Bound a collaborator call by its own limit and by what is left of the
/// product budget. `Err` carries the limit that expired.
async fn bounded<F: Future>(limit: Duration, deadline: Instant, call: F) -> std::result::Result<F::Output, Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    let effective = limit.min(remaining);
    tokio::time::timeout(effective, call).await.map_err(|_| effective)
}

pub struct ResolutionOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    search: Arc<dyn ImageSearch>,
    validator: Arc<dyn ImageValidator>,
    config: ResolverConfig,
}

impl ResolutionOrchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        search: Arc<dyn ImageSearch>,
        validator: Arc<dyn ImageValidator>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            db,
            event_bus,
            search,
            validator,
            config,
        }
    }

    fn notify(&self, table: &str, row_id: Uuid) {
        self.event_bus.emit_lossy(FlyerEvent::row_changed(table, row_id));
    }

    async fn transition(&self, product_id: Uuid, status: ProductStatus) -> Result<()> {
        db::products::set_status(&self.db, product_id, status).await?;
        self.notify("products", product_id);
        Ok(())
    }

    async fn fail(&self, product: &Product, error: ResolveError) -> Result<ProductResolution> {
        let message = error.to_string();
        db::products::fail(&self.db, product.id, &message).await?;
        self.notify("products", product.id);

        info!(product_id = %product.id, product = %product.name, error = %message, "Product failed");
        Ok(ProductResolution::Failed(error))
    }

    /// Resolve one product against a certified image snapshot
    ///
    /// The product always ends `completed` or `failed` unless a write fails,
    /// in which case the error is returned and the row keeps its last status.
    pub async fn resolve(&self, product: &Product, bank: &[CertifiedImage]) -> Result<ProductResolution> {
        db::products::begin_resolution(&self.db, product.id).await?;
        self.notify("products", product.id);

        if let Some(image) = find_match(bank, &product.name) {
            return self.commit_bank_hit(product, image).await;
        }

        let deadline = Instant::now() + self.config.product_timeout;

        self.transition(product.id, ProductStatus::SearchingWeb).await?;
        let candidates = match self.search_candidates(product, deadline).await {
            Ok(candidates) => candidates,
            Err(error) => return self.fail(product, error).await,
        };

        self.transition(product.id, ProductStatus::Validating).await?;
        let (best, attempts) = self.validate_candidates(product, &candidates, deadline).await;

        match best {
            Some((link, confidence)) => {
                db::products::complete(&self.db, product.id, &link, ImageSource::WebValidated).await?;
                self.notify("products", product.id);

                info!(
                    product_id = %product.id,
                    product = %product.name,
                    confidence = confidence,
                    evaluated = attempts.len(),
                    "Product resolved from web"
                );
                Ok(ProductResolution::WebHit {
                    image_url: link,
                    confidence,
                })
            }
            None => self.fail(product, ResolveError::NoValidCandidate { attempts }).await,
        }
    }

    async fn commit_bank_hit(&self, product: &Product, image: &CertifiedImage) -> Result<ProductResolution> {
        db::products::complete(&self.db, product.id, &image.image_url, ImageSource::CertifiedBank).await?;
        self.notify("products", product.id);

        // The product is resolved either way; a lost usage count only affects statistics
        match db::certified_images::record_usage(&self.db, image.id, Utc::now()).await {
            Ok(()) => self.notify("certified_images", image.id),
            Err(e) => warn!(
                product_id = %product.id,
                certified_image_id = %image.id,
                error = %e,
                "Failed to record certified image usage"
            ),
        }

        info!(
            product_id = %product.id,
            product = %product.name,
            certified_image_id = %image.id,
            "Product resolved from certified bank"
        );
        Ok(ProductResolution::BankHit {
            certified_image_id: image.id,
            image_url: image.image_url.clone(),
        })
    }

    async fn search_candidates(
        &self,
        product: &Product,
        deadline: Instant,
    ) -> std::result::Result<Vec<ImageCandidate>, ResolveError> {
        let query = product.search_query();
        let limit = self.config.max_candidates;

        let outcome = bounded(self.config.search_timeout, deadline, self.search.search(&query, limit)).await;
        let cause = match outcome {
            Ok(Ok(mut candidates)) if !candidates.is_empty() => {
                candidates.truncate(limit);
                debug!(
                    product_id = %product.id,
                    search = self.search.name(),
                    candidates = candidates.len(),
                    "Candidates found"
                );
                return Ok(candidates);
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(limit) => Some(format!("search timed out after {} ms", limit.as_millis())),
        };

        if let Some(cause) = &cause {
            warn!(product_id = %product.id, search = self.search.name(), error = %cause, "Image search failed");
        }
        Err(ResolveError::NoCandidates { cause })
    }

    /// Validate in search order, keeping the most confident valid verdict
    ///
    /// Stops as soon as the best confidence reaches the acceptance threshold,
    /// so later candidates are never sent to the validator. Ties keep the
    /// earlier candidate.
    async fn validate_candidates(
        &self,
        product: &Product,
        candidates: &[ImageCandidate],
        deadline: Instant,
    ) -> (Option<(String, f64)>, Vec<ValidationAttempt>) {
        let mut attempts = Vec::with_capacity(candidates.len());
        let mut best: Option<(String, f64)> = None;
        let mut best_confidence = 0.0;

        for (index, candidate) in candidates.iter().enumerate() {
            if Instant::now() >= deadline {
                warn!(
                    product_id = %product.id,
                    skipped = candidates.len() - index,
                    "Product deadline exceeded, skipping remaining candidates"
                );
                attempts.extend(candidates[index..].iter().map(|c| ValidationAttempt {
                    link: c.link.clone(),
                    outcome: AttemptOutcome::Skipped {
                        reason: DEADLINE_EXCEEDED.to_string(),
                    },
                }));
                break;
            }

            let call = self.validator.validate(&candidate.link, &product.name, product.description.as_deref());
            let outcome = match bounded(self.config.validation_timeout, deadline, call).await {
                Ok(Ok(verdict)) => AttemptOutcome::Verdict(verdict),
                Ok(Err(e)) => AttemptOutcome::CollaboratorFailure { error: e.to_string() },
                Err(limit) => AttemptOutcome::CollaboratorFailure {
                    error: format!("validation timed out after {} ms", limit.as_millis()),
                },
            };

            match &outcome {
                AttemptOutcome::Verdict(verdict) => {
                    debug!(
                        product_id = %product.id,
                        link = %candidate.link,
                        is_valid = verdict.is_valid,
                        confidence = verdict.confidence,
                        "Candidate validated"
                    );
                    if verdict.is_valid && verdict.confidence > best_confidence {
                        best_confidence = verdict.confidence;
                        best = Some((candidate.link.clone(), verdict.confidence));
                    }
                }
                AttemptOutcome::CollaboratorFailure { error } => warn!(
                    product_id = %product.id,
                    link = %candidate.link,
                    validator = self.validator.name(),
                    error = %error,
                    "Candidate validation failed"
                ),
                AttemptOutcome::Skipped { .. } => {}
            }

            attempts.push(ValidationAttempt {
                link: candidate.link.clone(),
                outcome,
            });

            if best.is_some() && best_confidence >= self.config.acceptance_threshold {
                debug!(product_id = %product.id, confidence = best_confidence, "Acceptance threshold reached");
                break;
            }
        }

        (best, attempts)
    }
}
