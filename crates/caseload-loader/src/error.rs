//! Error types for the loader
//!
//! One variant per failure class of a load run. Only `SourceMissing` is
//! recovered locally; rejections go through the configured reject policy and
//! everything else aborts the run.

use caseload_common::Entity;
use std::path::PathBuf;
use thiserror::Error;

use crate::sink::SinkError;
use crate::validate::Violation;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, LoadError>;

#[derive(Error, Debug)]
pub enum LoadError {
    /// Expected input file is absent
    #[error("Source file for '{entity}' not found at {}", .path.display())]
    SourceMissing { entity: Entity, path: PathBuf },

    /// Input file exists but cannot be read or parsed
    #[error("Failed to read source for '{entity}': {reason}")]
    Source { entity: Entity, reason: String },

    /// Column set does not match the target schema
    #[error("Schema mismatch for '{entity}': {reason}")]
    SchemaMismatch { entity: Entity, reason: String },

    /// The sink refused the batch; the entity's transaction was rolled back
    #[error("Ingest rejected for '{entity}' ({rows_so_far} rows loaded before it): {reason}")]
    IngestRejected {
        entity: Entity,
        rows_so_far: u64,
        reason: String,
    },

    /// Rows break a status/date rule and were never sent to the sink
    #[error(
        "{} row(s) of '{entity}' violate status/date rules, first: {}",
        .violations.len(),
        .violations.first().map(ToString::to_string).unwrap_or_default()
    )]
    InvariantViolation {
        entity: Entity,
        violations: Vec<Violation>,
    },

    /// Connection to the sink is gone; any open transaction was aborted
    #[error("Connection lost{}: {reason}", .entity.map(|e| format!(" while loading '{}'", e)).unwrap_or_default())]
    ConnectionLost {
        entity: Option<Entity>,
        reason: String,
    },

    /// Invalid loader configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LoadError {
    /// Map a sink failure for `entity` onto the load taxonomy.
    pub fn from_sink(entity: Entity, rows_so_far: u64, err: SinkError) -> Self {
        match err {
            SinkError::Rejected(reason) => LoadError::IngestRejected {
                entity,
                rows_so_far,
                reason,
            },
            SinkError::Schema(reason) => LoadError::SchemaMismatch { entity, reason },
            SinkError::Connection(reason) => LoadError::ConnectionLost {
                entity: Some(entity),
                reason,
            },
        }
    }

    /// Entity the error is about, if any
    pub fn entity(&self) -> Option<Entity> {
        match self {
            LoadError::SourceMissing { entity, .. }
            | LoadError::Source { entity, .. }
            | LoadError::SchemaMismatch { entity, .. }
            | LoadError::IngestRejected { entity, .. }
            | LoadError::InvariantViolation { entity, .. } => Some(*entity),
            LoadError::ConnectionLost { entity, .. } => *entity,
            LoadError::Config(_) => None,
        }
    }

    /// Failures the reject policy decides about
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LoadError::IngestRejected { .. } | LoadError::InvariantViolation { .. }
        )
    }
}
