//! Row-level status/date checks run before a batch is sent
//!
//! The generator never produces a `closed` case without a closure date, but a
//! hand-edited or foreign file can. Such rows are caught here rather than left
//! to whatever constraints the target schema happens to declare.

use caseload_common::{EntityDescriptor, StatusDateRule};
use serde::Serialize;

use crate::normalize::NormalizedBatch;

/// One row breaking one status/date rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// 1-based data row (the header is not counted)
    pub row: usize,
    pub status_column: &'static str,
    pub status: Option<String>,
    pub date_column: &'static str,
    pub date: Option<String>,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "row {}: {}={} with {}={}",
            self.row,
            self.status_column,
            self.status.as_deref().unwrap_or("NULL"),
            self.date_column,
            self.date.as_deref().unwrap_or("NULL"),
        )
    }
}

/// Check every status/date rule of `descriptor` against `batch`.
///
/// Rules whose columns are absent from the batch are skipped; the column
/// selector reports those.
pub fn check_rules(descriptor: &EntityDescriptor, batch: &NormalizedBatch) -> Vec<Violation> {
    descriptor
        .rules
        .iter()
        .flat_map(|rule| check_rule(rule, batch))
        .collect()
}

fn check_rule(rule: &StatusDateRule, batch: &NormalizedBatch) -> Vec<Violation> {
    let (Some(status_idx), Some(date_idx)) = (
        batch.column_index(rule.status_column),
        batch.column_index(rule.date_column),
    ) else {
        return Vec::new();
    };

    batch
        .rows()
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let status = row[status_idx].as_deref();
            let date = row[date_idx].as_deref();
            (!rule.holds(status, date)).then(|| Violation {
                row: i + 1,
                status_column: rule.status_column,
                status: status.map(String::from),
                date_column: rule.date_column,
                date: date.map(String::from),
            })
        })
        .collect()
}
