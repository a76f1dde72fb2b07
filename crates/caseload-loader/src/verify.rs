//! Post-load row count verification

use caseload_common::Entity;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::{LoadError, Result};
use crate::sink::BulkSink;

/// Count of one table against what the run expected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyRow {
    pub entity: Entity,
    /// `None` when the table is only being inspected
    pub expected: Option<u64>,
    pub actual: u64,
}

impl VerifyRow {
    pub fn matches(&self) -> bool {
        self.expected.is_none_or(|expected| expected == self.actual)
    }
}

/// Row counts of all seven tables in dependency order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub rows: Vec<VerifyRow>,
}

impl Verification {
    pub fn is_consistent(&self) -> bool {
        self.rows.iter().all(VerifyRow::matches)
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &VerifyRow> {
        self.rows.iter().filter(|r| !r.matches())
    }

    pub fn actual(&self, entity: Entity) -> Option<u64> {
        self.rows.iter().find(|r| r.entity == entity).map(|r| r.actual)
    }

    pub fn total(&self) -> u64 {
        self.rows.iter().map(|r| r.actual).sum()
    }

    /// Render as a table for terminal output
    pub fn render_table(&self) -> String {
        use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec!["Table", "Rows", "Expected", "Status"]);

        for row in &self.rows {
            table.add_row(vec![
                row.entity.table_name().to_string(),
                row.actual.to_string(),
                row.expected.map(|e| e.to_string()).unwrap_or_else(|| "-".to_string()),
                if row.matches() { "ok" } else { "MISMATCH" }.to_string(),
            ]);
        }

        format!("{}\n", table)
    }
}

/// Count every table and compare against `expected`.
///
/// Entities absent from `expected` are reported without a comparison.
pub async fn verify<S>(sink: &mut S, expected: &BTreeMap<Entity, u64>) -> Result<Verification>
where
    S: BulkSink + ?Sized,
{
    let mut rows = Vec::with_capacity(Entity::ALL.len());

    for entity in Entity::ALL {
        let actual = sink
            .count(entity)
            .await
            .map_err(|e| LoadError::from_sink(entity, 0, e))?;
        let row = VerifyRow {
            entity,
            expected: expected.get(&entity).copied(),
            actual,
        };

        info!("{:20} {:>10} rows", entity.table_name(), actual);
        if !row.matches() {
            warn!(
                entity = %entity,
                expected = row.expected,
                actual,
                "Row count does not match what was loaded"
            );
        }
        rows.push(row);
    }

    Ok(Verification { rows })
}
