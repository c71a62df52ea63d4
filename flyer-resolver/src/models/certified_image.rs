//! Certified image bank records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A previously vetted image reusable across projects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertifiedImage {
    pub id: Uuid,
    pub product_name: String,
    /// `normalize(product_name)`, derived at insert time
    pub normalized_name: String,
    pub image_url: String,
    pub category: Option<String>,
    pub description: Option<String>,
    /// Only ever incremented, one per bank hit
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Certified image registration request
///
/// Bulk imports may omit `product_name` and pass the uploaded `filename`
/// instead; the display name is then derived from it.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCertifiedImage {
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    pub image_url: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}
