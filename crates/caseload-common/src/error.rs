//! Error types shared across the caseload crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Main error type for the common crate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    #[error("Unknown entity: '{0}'. Expected one of: children, cases, case_child, episodes, placements, allegations, notes")]
    UnknownEntity(String),
}
