//! Generator configuration

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{GenError, Result};

// ============================================================================
// Generator Configuration Constants
// ============================================================================

/// Default RNG seed.
pub const DEFAULT_SEED: u64 = 42;

/// Default number of children.
pub const DEFAULT_CHILDREN: usize = 500;

/// Default number of cases.
pub const DEFAULT_CASES: usize = 300;

/// Default number of removal episodes.
pub const DEFAULT_EPISODES: usize = 400;

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "data/raw";

/// Sizes, seed and reference date of one generated dataset
///
/// All dates are computed backwards from `reference_date`, so the same seed
/// and reference date always yield the same dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratorConfig {
    pub seed: u64,
    pub children: usize,
    pub cases: usize,
    pub episodes: usize,
    pub reference_date: NaiveDate,
}

impl GeneratorConfig {
    pub fn new(reference_date: NaiveDate) -> Self {
        Self {
            seed: DEFAULT_SEED,
            children: DEFAULT_CHILDREN,
            cases: DEFAULT_CASES,
            episodes: DEFAULT_EPISODES,
            reference_date,
        }
    }

    /// Defaults with today as the reference date
    pub fn today() -> Self {
        Self::new(chrono::Local::now().date_naive())
    }

    pub fn validate(&self) -> Result<()> {
        if self.children == 0 {
            return Err(GenError::Config("at least one child is required".to_string()));
        }
        if self.cases == 0 {
            return Err(GenError::Config("at least one case is required".to_string()));
        }
        if self.episodes == 0 {
            return Err(GenError::Config("at least one episode is required".to_string()));
        }
        Ok(())
    }
}
