//! Outcome of a load run

use caseload_common::Entity;
use serde::Serialize;
use std::path::Path;

use crate::config::{LoadMode, RejectPolicy};
use crate::verify::Verification;

/// What happened to one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntityOutcome {
    Loaded { rows: u64 },
    /// No source file; counts as zero rows
    Missing,
    /// Rolled back; nothing of this entity was committed
    Rejected { reason: String },
    /// The run stopped before this entity
    NotReached,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityReport {
    pub entity: Entity,
    #[serde(flatten)]
    pub outcome: EntityOutcome,
    /// Date values that could not be parsed and were loaded as null
    pub coerced_dates: usize,
    pub elapsed_secs: f64,
}

impl EntityReport {
    pub fn rows(&self) -> u64 {
        match self.outcome {
            EntityOutcome::Loaded { rows } => rows,
            _ => 0,
        }
    }
}

/// Summary of one run, serializable for `--report`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub mode: LoadMode,
    pub on_reject: RejectPolicy,
    pub entities: Vec<EntityReport>,
    pub verification: Option<Verification>,
    pub total_rows: u64,
    pub elapsed_secs: f64,
    /// Fatal error that ended the run early
    pub error: Option<String>,
}

impl LoadReport {
    pub fn new(mode: LoadMode, on_reject: RejectPolicy) -> Self {
        Self {
            mode,
            on_reject,
            entities: Vec::new(),
            verification: None,
            total_rows: 0,
            elapsed_secs: 0.0,
            error: None,
        }
    }

    pub fn record(&mut self, report: EntityReport) {
        self.total_rows += report.rows();
        self.entities.push(report);
    }

    pub fn entity(&self, entity: Entity) -> Option<&EntityReport> {
        self.entities.iter().find(|r| r.entity == entity)
    }

    /// Rows committed for `entity` by this run
    pub fn rows_loaded(&self, entity: Entity) -> u64 {
        self.entity(entity).map(EntityReport::rows).unwrap_or(0)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &EntityReport> {
        self.entities
            .iter()
            .filter(|r| matches!(r.outcome, EntityOutcome::Rejected { .. }))
    }

    /// Ran through verification with no fatal error and nothing rejected.
    ///
    /// A count mismatch does not fail a run: triggers or defaults in the
    /// target can legitimately change counts. It shows up in
    /// [`LoadReport::has_count_mismatch`] and the verification table.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.rejected().next().is_none() && self.verification.is_some()
    }

    pub fn has_count_mismatch(&self) -> bool {
        self.verification
            .as_ref()
            .is_some_and(|v| !v.is_consistent())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::verify::VerifyRow;

    fn loaded(entity: Entity, rows: u64) -> EntityReport {
        EntityReport {
            entity,
            outcome: EntityOutcome::Loaded { rows },
            coerced_dates: 0,
            elapsed_secs: 0.1,
        }
    }

    #[test]
    fn test_totals_and_success() {
        let mut report = LoadReport::new(LoadMode::Replace, RejectPolicy::Abort);
        report.record(loaded(Entity::Child, 500));
        report.record(loaded(Entity::Case, 300));
        assert_eq!(report.total_rows, 800);
        assert!(!report.is_success(), "unverified run is not a success");

        report.verification = Some(Verification {
            rows: vec![VerifyRow {
                entity: Entity::Child,
                expected: Some(500),
                actual: 500,
            }],
        });
        assert!(report.is_success());
    }

    #[test]
    fn test_count_mismatch_is_not_a_failure() {
        let mut report = LoadReport::new(LoadMode::Replace, RejectPolicy::Abort);
        report.record(loaded(Entity::Child, 500));
        report.verification = Some(Verification {
            rows: vec![VerifyRow {
                entity: Entity::Child,
                expected: Some(500),
                actual: 501,
            }],
        });

        assert!(report.is_success());
        assert!(report.has_count_mismatch());
    }

    #[test]
    fn test_rejection_fails_run() {
        let mut report = LoadReport::new(LoadMode::Append, RejectPolicy::Continue);
        report.record(EntityReport {
            entity: Entity::Note,
            outcome: EntityOutcome::Rejected {
                reason: "bad".to_string(),
            },
            coerced_dates: 0,
            elapsed_secs: 0.0,
        });
        report.verification = Some(Verification::default());

        assert!(!report.is_success());
        assert_eq!(report.rows_loaded(Entity::Note), 0);
    }

    #[test]
    fn test_json_shape() {
        let mut report = LoadReport::new(LoadMode::Replace, RejectPolicy::Abort);
        report.record(loaded(Entity::Child, 2));
        report.record(EntityReport {
            entity: Entity::Allegation,
            outcome: EntityOutcome::Missing,
            coerced_dates: 0,
            elapsed_secs: 0.0,
        });

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["mode"], "replace");
        assert_eq!(json["entities"][0]["entity"], "child");
        assert_eq!(json["entities"][0]["outcome"], "loaded");
        assert_eq!(json["entities"][0]["rows"], 2);
        assert_eq!(json["entities"][1]["outcome"], "missing");
    }
}
