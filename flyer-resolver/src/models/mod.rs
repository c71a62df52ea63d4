//! Data models for flyer-resolver
//!
//! - Project lifecycle and aggregate counters
//! - Product resolution state machine
//! - Certified image bank records

pub mod certified_image;
pub mod product;
pub mod project;

pub use certified_image::{CertifiedImage, NewCertifiedImage};
pub use product::{ImageSource, NewProduct, Product, ProductStatus};
pub use project::{NewProject, Project, ProjectStatus, ProjectStatusCounts, RunSummary};
