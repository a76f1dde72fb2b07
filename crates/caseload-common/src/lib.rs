//! Caseload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared schema descriptors, logging setup, and error handling for the
//! caseload workspace.
//!
//! # Overview
//!
//! - **Schema**: the seven child-welfare entities, their columns, identity
//!   columns, foreign keys and status/date rules, in dependency order
//! - **Logging**: `tracing` subscriber setup shared by both binaries
//! - **Error Handling**: common error type and result alias
//!
//! # Example
//!
//! ```
//! use caseload_common::schema::Entity;
//!
//! let order: Vec<&str> = Entity::ALL.iter().map(|e| e.table_name()).collect();
//! assert_eq!(order.first(), Some(&"children"));
//! assert_eq!(Entity::Episode.descriptor().identity, Some("episode_id"));
//! ```

pub mod error;
pub mod logging;
pub mod schema;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use schema::{ColumnDef, ColumnKind, Entity, EntityDescriptor, StatusDateRule};
