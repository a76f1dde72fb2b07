//! PostgreSQL sink
//!
//! One connection, explicit transactions, and `COPY ... FROM STDIN` for
//! ingest. The payload is streamed in fixed-size chunks; a failed send aborts
//! the COPY so the server discards what it received.

use async_trait::async_trait;
use caseload_common::Entity;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{BulkSink, IngestRequest, SinkError, SinkResult};
use crate::config::DatabaseConfig;
use crate::encode::quote_ident;

/// Bytes handed to the server per `CopyData` message
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// [`BulkSink`] over a single PostgreSQL connection
pub struct PgSink {
    conn: Option<PgConnection>,
    target: String,
}

impl std::fmt::Debug for PgSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSink")
            .field("target", &self.target)
            .field("open", &self.conn.is_some())
            .finish()
    }
}

impl PgSink {
    /// Open a connection within the configured timeout
    pub async fn connect(config: &DatabaseConfig) -> SinkResult<Self> {
        let target = config.masked_url();
        info!(url = %target, "Connecting to database");

        let options = PgConnectOptions::from_str(&config.url)
            .map_err(|e| SinkError::Connection(format!("invalid database URL: {}", e)))?
            .disable_statement_logging();

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let conn = tokio::time::timeout(timeout, options.connect())
            .await
            .map_err(|_| {
                SinkError::Connection(format!(
                    "timed out after {}s connecting to {}",
                    config.connect_timeout_secs, target
                ))
            })?
            .map_err(classify)?;

        Ok(Self {
            conn: Some(conn),
            target,
        })
    }

    /// Close the connection gracefully
    pub async fn close(mut self) -> SinkResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await.map_err(classify)?;
        }
        Ok(())
    }

    fn conn(&mut self) -> SinkResult<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| SinkError::Connection("connection closed".to_string()))
    }

    async fn execute(&mut self, sql: &str) -> SinkResult<u64> {
        let conn = self.conn()?;
        let result = conn.execute(sql).await;
        self.settle(result).map(|done| done.rows_affected())
    }

    /// Drop the connection after a connection-class failure so later calls
    /// fail fast instead of writing to a dead socket.
    fn settle<T>(&mut self, result: Result<T, sqlx::Error>) -> SinkResult<T> {
        result.map_err(|e| {
            let err = classify(e);
            if matches!(err, SinkError::Connection(_)) {
                self.conn = None;
            }
            err
        })
    }
}

/// Map a driver error onto the sink failure classes by SQLSTATE class
pub fn classify(err: sqlx::Error) -> SinkError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            let message = format!("{} (SQLSTATE {})", db.message(), code);
            match code.get(..2) {
                // data exception, integrity constraint violation
                Some("22") | Some("23") => SinkError::Rejected(message),
                // syntax error or access rule violation: undefined table/column
                Some("42") => SinkError::Schema(message),
                // connection exception, operator intervention
                Some("08") | Some("57") => SinkError::Connection(message),
                _ => SinkError::Rejected(message),
            }
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => SinkError::Connection(err.to_string()),
        _ => SinkError::Rejected(err.to_string()),
    }
}

#[async_trait]
impl BulkSink for PgSink {
    fn describe(&self) -> String {
        format!("postgres at {}", self.target)
    }

    async fn ping(&mut self) -> SinkResult<()> {
        let conn = self.conn()?;
        let result = conn.ping().await;
        self.settle(result)
    }

    async fn begin(&mut self) -> SinkResult<()> {
        self.execute("BEGIN").await.map(|_| ())
    }

    async fn commit(&mut self) -> SinkResult<()> {
        self.execute("COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> SinkResult<()> {
        self.execute("ROLLBACK").await.map(|_| ())
    }

    async fn purge(&mut self, entity: Entity) -> SinkResult<()> {
        let sql = format!(
            "TRUNCATE TABLE {} RESTART IDENTITY CASCADE",
            quote_ident(entity.table_name())
        );
        self.execute(&sql).await?;
        debug!(entity = %entity, "Truncated");
        Ok(())
    }

    async fn ingest(&mut self, request: IngestRequest<'_>) -> SinkResult<u64> {
        let statement = request
            .format
            .copy_statement(request.entity.table_name(), request.columns);
        debug!(entity = %request.entity, bytes = request.payload.len(), "{}", statement);

        let conn = self.conn()?;
        let result = copy_in(conn, &statement, request.payload).await;
        self.settle(result)
    }

    async fn count(&mut self, entity: Entity) -> SinkResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(entity.table_name()));
        let conn = self.conn()?;
        let result = sqlx::query_scalar::<_, i64>(&sql).fetch_one(&mut *conn).await;
        let count = self.settle(result)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

async fn copy_in(conn: &mut PgConnection, statement: &str, payload: &[u8]) -> Result<u64, sqlx::Error> {
    let mut copy = conn.copy_in_raw(statement).await?;

    for chunk in payload.chunks(COPY_CHUNK_SIZE) {
        let sent = copy.send(chunk).await.map(|_| ());
        if let Err(e) = sent {
            // Best effort; the send error is the one worth reporting.
            let _ = copy.abort(e.to_string()).await;
            return Err(e);
        }
    }

    copy.finish().await
}
