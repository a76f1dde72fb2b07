//! Bulk-ingest sinks
//!
//! A sink is one open session against the target store. The orchestrator
//! drives it strictly sequentially: `begin`, one `purge` or `ingest` per
//! entity, then `commit` or `rollback`.
//!
//! - [`PgSink`]: PostgreSQL over a single connection, ingest via `COPY FROM STDIN`
//! - [`MemorySink`]: in-process store enforcing keys and status/date rules,
//!   used for dry runs and tests

use async_trait::async_trait;
use caseload_common::Entity;
use thiserror::Error;

use crate::encode::TransferFormat;

pub mod memory;
pub mod postgres;

pub use memory::{FaultPoint, MemorySink};
pub use postgres::PgSink;

/// Sink failure classes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Malformed row, type mismatch, or constraint violation
    #[error("{0}")]
    Rejected(String),

    /// Unknown table or column
    #[error("{0}")]
    Schema(String),

    /// Session is gone or unusable
    #[error("{0}")]
    Connection(String),
}

pub type SinkResult<T> = Result<T, SinkError>;

/// One bulk-ingest call
#[derive(Debug, Clone, Copy)]
pub struct IngestRequest<'a> {
    pub entity: Entity,
    /// Columns in payload order
    pub columns: &'a [String],
    pub payload: &'a [u8],
    pub format: &'a TransferFormat,
}

#[async_trait]
pub trait BulkSink: Send {
    /// Short description for log lines
    fn describe(&self) -> String;

    /// Round-trip to confirm the session is usable
    async fn ping(&mut self) -> SinkResult<()>;

    async fn begin(&mut self) -> SinkResult<()>;

    async fn commit(&mut self) -> SinkResult<()>;

    async fn rollback(&mut self) -> SinkResult<()>;

    /// Empty `entity`, reset its identity sequence, cascade to dependents
    async fn purge(&mut self, entity: Entity) -> SinkResult<()>;

    /// Bulk-load the payload; returns rows affected
    async fn ingest(&mut self, request: IngestRequest<'_>) -> SinkResult<u64>;

    /// Current row count of `entity`
    async fn count(&mut self, entity: Entity) -> SinkResult<u64>;
}
