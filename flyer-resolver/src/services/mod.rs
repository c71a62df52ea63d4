//! Service modules for the image resolution pipeline
//!
//! - `normalizer` / `bank_matcher`: certified bank lookup
//! - `image_search` / `image_validator`: web collaborators behind traits
//! - `resolution_orchestrator`: per-product state machine
//! - `project_runner`: sequential run over a project's products

pub mod bank_matcher;
pub mod image_search;
pub mod image_validator;
pub mod normalizer;
pub mod project_runner;
pub mod resolution_orchestrator;

pub use image_search::{GoogleImageSearchClient, ImageCandidate, ImageSearch, SearchError};
pub use image_validator::{GeminiImageValidator, ImageValidator, ValidationError, ValidationVerdict};
pub use project_runner::{abandon_run, ProjectRunner, RunError, RunOutcome, RunTicket};
pub use resolution_orchestrator::{
    AttemptOutcome, ProductResolution, ResolutionOrchestrator, ResolveError, ValidationAttempt,
};
