//! Project (flyer) lifecycle
//!
//! draft → processing → completed | failed; a finished project may be processed again.

use chrono::{DateTime, Utc};
use flyer_common::events::ProjectCounters;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Project processing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Processing,
    Completed,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Processing => "processing",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Failed)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ProjectStatus::Draft),
            "processing" => Ok(ProjectStatus::Processing),
            "completed" => Ok(ProjectStatus::Completed),
            "failed" => Ok(ProjectStatus::Failed),
            other => Err(format!("unknown project status: {}", other)),
        }
    }
}

/// A flyer under construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    #[serde(flatten)]
    pub counters: ProjectCounters,
    /// Structural failure reason of the last run (not per-product detail)
    pub error_message: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Project creation request
#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Final figures of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub project_id: Uuid,
    pub status: ProjectStatus,
    #[serde(flatten)]
    pub counters: ProjectCounters,
    pub duration_ms: u64,
}

/// How many projects sit in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStatusCounts {
    pub draft: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_serializes_flat_counters() {
        let project = Project {
            id: Uuid::nil(),
            name: "Weekend deals".to_string(),
            description: None,
            status: ProjectStatus::Completed,
            counters: ProjectCounters {
                total_products: 3,
                products_completed: 2,
                products_from_bank: 1,
                products_from_web: 1,
                products_failed: 1,
            },
            error_message: None,
            processing_started_at: None,
            processing_finished_at: None,
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&project).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["total_products"], 3);
        assert_eq!(json["products_from_web"], 1);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("processing".parse::<ProjectStatus>().unwrap(), ProjectStatus::Processing);
        assert!(ProjectStatus::Failed.is_terminal());
        assert!(!ProjectStatus::Draft.is_terminal());
        assert!("PROCESSING".parse::<ProjectStatus>().is_err());
    }
}
