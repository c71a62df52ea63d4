//! Product resolution state machine
//!
//! pending → searching_bank → searching_web → validating → completed,
//! or → failed from any non-terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Per-product resolution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    /// Not yet picked up by a run
    Pending,
    /// Looking up the certified image bank
    SearchingBank,
    /// Querying the candidate search collaborator
    SearchingWeb,
    /// Running candidates through the image validator
    Validating,
    /// Image resolved (terminal)
    Completed,
    /// No image could be resolved (terminal)
    Failed,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Pending => "pending",
            ProductStatus::SearchingBank => "searching_bank",
            ProductStatus::SearchingWeb => "searching_web",
            ProductStatus::Validating => "validating",
            ProductStatus::Completed => "completed",
            ProductStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProductStatus::Completed | ProductStatus::Failed)
    }

    pub const ALL: [ProductStatus; 6] = [
        ProductStatus::Pending,
        ProductStatus::SearchingBank,
        ProductStatus::SearchingWeb,
        ProductStatus::Validating,
        ProductStatus::Completed,
        ProductStatus::Failed,
    ];

    /// Whether the state machine allows moving from `self` to `next`
    ///
    /// Terminal products only leave their status when a new run claims the
    /// project and puts them back to `pending`.
    pub fn can_transition_to(&self, next: ProductStatus) -> bool {
        use ProductStatus::*;
        match (self, next) {
            (Completed, _) | (Failed, _) => false,
            (_, Failed) => true,
            (Pending, SearchingBank) => true,
            (SearchingBank, SearchingWeb) | (SearchingBank, Completed) => true,
            (SearchingWeb, Validating) => true,
            (Validating, Completed) => true,
            _ => false,
        }
    }

    /// Statuses from which `next` may be entered
    pub fn predecessors(next: ProductStatus) -> Vec<ProductStatus> {
        Self::ALL
            .into_iter()
            .filter(|status| status.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProductStatus::Pending),
            "searching_bank" => Ok(ProductStatus::SearchingBank),
            "searching_web" => Ok(ProductStatus::SearchingWeb),
            "validating" => Ok(ProductStatus::Validating),
            "completed" => Ok(ProductStatus::Completed),
            "failed" => Ok(ProductStatus::Failed),
            other => Err(format!("unknown product status: {}", other)),
        }
    }
}

/// Where a resolved image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    CertifiedBank,
    WebValidated,
}

impl ImageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSource::CertifiedBank => "certified_bank",
            ImageSource::WebValidated => "web_validated",
        }
    }
}

impl FromStr for ImageSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "certified_bank" => Ok(ImageSource::CertifiedBank),
            "web_validated" => Ok(ImageSource::WebValidated),
            other => Err(format!("unknown image source: {}", other)),
        }
    }
}

/// One line item of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub position: i64,
    pub status: ProductStatus,
    /// Present iff status is `completed`
    pub image_url: Option<String>,
    /// Present iff status is `completed`
    pub image_source: Option<ImageSource>,
    /// Present only when status is `failed`
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Search query built from name and description
    pub fn search_query(&self) -> String {
        format!("{} {}", self.name, self.description.as_deref().unwrap_or(""))
            .trim()
            .to_string()
    }
}

/// Product creation request
#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: f64,
    /// Appended after the last product when absent
    #[serde(default)]
    pub position: Option<i64>,
}
