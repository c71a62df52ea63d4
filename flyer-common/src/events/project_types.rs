//! Project processing type definitions
//!
//! Supporting types carried by project lifecycle events.

use serde::{Deserialize, Serialize};

/// Aggregate per-project resolution counters
///
/// `completed == from_bank + from_web` at all times; `completed + failed <= total`
/// while a run is in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCounters {
    pub total_products: u32,
    pub products_completed: u32,
    pub products_from_bank: u32,
    pub products_from_web: u32,
    pub products_failed: u32,
}

impl ProjectCounters {
    /// Fresh counters for a run over `total` products
    pub fn for_run(total: u32) -> Self {
        Self {
            total_products: total,
            ..Self::default()
        }
    }

    pub fn record_bank_hit(&mut self) {
        self.products_completed += 1;
        self.products_from_bank += 1;
    }

    pub fn record_web_hit(&mut self) {
        self.products_completed += 1;
        self.products_from_web += 1;
    }

    pub fn record_failure(&mut self) {
        self.products_failed += 1;
    }

    /// Products that reached a terminal state so far
    pub fn processed(&self) -> u32 {
        self.products_completed + self.products_failed
    }

    /// True when every product of the run failed
    pub fn all_failed(&self) -> bool {
        self.products_failed == self.total_products
    }

    /// Percentage of products processed (0.0 - 100.0)
    pub fn percentage(&self) -> f64 {
        if self.total_products == 0 {
            0.0
        } else {
            self.processed() as f64 / self.total_products as f64 * 100.0
        }
    }
}
