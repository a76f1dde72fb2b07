//! Load orchestration
//!
//! Drives one run through its states:
//!
//! ```text
//! Idle -> Connected -> [Purging] -> Loading(entity) x 7 -> Verifying -> Done
//!                                                      \-> Failed
//! ```
//!
//! Entities are loaded strictly in dependency order, each in its own
//! transaction. A purge (replace mode) runs in one transaction before any load.

use caseload_common::Entity;
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{LoadMode, LoaderConfig, RejectPolicy};
use crate::encode::{EncodedBatch, TransferFormat};
use crate::error::{LoadError, Result};
use crate::normalize::Normalizer;
use crate::report::{EntityOutcome, EntityReport, LoadReport};
use crate::select::select_columns;
use crate::sink::{BulkSink, IngestRequest, SinkError};
use crate::source::BatchSource;
use crate::validate::check_rules;
use crate::verify::verify;

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Connected,
    Purging,
    Loading(Entity),
    Verifying,
    Done,
    Failed,
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadState::Idle => write!(f, "idle"),
            LoadState::Connected => write!(f, "connected"),
            LoadState::Purging => write!(f, "purging"),
            LoadState::Loading(entity) => write!(f, "loading({})", entity),
            LoadState::Verifying => write!(f, "verifying"),
            LoadState::Done => write!(f, "done"),
            LoadState::Failed => write!(f, "failed"),
        }
    }
}

/// A run that ended in [`LoadState::Failed`], with what it got done
#[derive(Error, Debug)]
#[error("{error}")]
pub struct LoadFailure {
    #[source]
    pub error: LoadError,
    pub report: LoadReport,
}

struct EntityLoad {
    rows: u64,
    coerced_dates: usize,
}

/// Loads all entities from a [`BatchSource`] into a [`BulkSink`]
pub struct Orchestrator<S, Src> {
    config: LoaderConfig,
    sink: S,
    source: Src,
    normalizer: Normalizer,
    state: LoadState,
}

impl<S: BulkSink, Src: BatchSource> Orchestrator<S, Src> {
    pub fn new(config: LoaderConfig, sink: S, source: Src) -> Self {
        let normalizer = Normalizer::new(config.date_formats.clone());
        Self {
            config,
            sink,
            source,
            normalizer,
            state: LoadState::Idle,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn transition(&mut self, next: LoadState) {
        info!(from = %self.state, to = %next, "Load state transition");
        self.state = next;
    }

    /// Execute a full run. The orchestrator can be run again afterwards.
    pub async fn run(&mut self) -> std::result::Result<LoadReport, LoadFailure> {
        let started = Instant::now();
        let mut report = LoadReport::new(self.config.mode, self.config.on_reject);

        self.state = LoadState::Idle;
        info!(
            sink = %self.sink.describe(),
            mode = %self.config.mode,
            on_reject = %self.config.on_reject,
            "Starting load"
        );

        match self.execute(&mut report).await {
            Ok(()) => {
                report.elapsed_secs = started.elapsed().as_secs_f64();
                self.transition(LoadState::Done);
                info!(
                    total_rows = report.total_rows,
                    elapsed_secs = %format!("{:.2}", report.elapsed_secs),
                    success = report.is_success(),
                    "Load finished"
                );
                Ok(report)
            },
            Err(error) => {
                for entity in Entity::ALL {
                    if report.entity(entity).is_none() {
                        report.record(EntityReport {
                            entity,
                            outcome: EntityOutcome::NotReached,
                            coerced_dates: 0,
                            elapsed_secs: 0.0,
                        });
                    }
                }
                report.error = Some(error.to_string());
                report.elapsed_secs = started.elapsed().as_secs_f64();
                self.transition(LoadState::Failed);
                error!(
                    entity = ?error.entity(),
                    total_rows = report.total_rows,
                    "Load failed: {}",
                    error
                );
                Err(LoadFailure { error, report })
            },
        }
    }

    async fn execute(&mut self, report: &mut LoadReport) -> Result<()> {
        self.sink
            .ping()
            .await
            .map_err(|e| LoadError::ConnectionLost {
                entity: None,
                reason: e.to_string(),
            })?;
        self.transition(LoadState::Connected);

        let baseline = match self.config.mode {
            LoadMode::Replace => {
                self.transition(LoadState::Purging);
                self.purge_all().await?;
                BTreeMap::new()
            },
            LoadMode::Append => self.current_counts().await?,
        };

        for entity in Entity::ALL {
            self.transition(LoadState::Loading(entity));
            let started = Instant::now();

            let outcome = match self.load_entity(entity, report.total_rows).await {
                Ok(load) => {
                    info!(entity = %entity, rows = load.rows, "Loaded");
                    Ok((EntityOutcome::Loaded { rows: load.rows }, load.coerced_dates))
                },
                Err(LoadError::SourceMissing { entity, path }) => {
                    warn!(
                        entity = %entity,
                        path = %path.display(),
                        "Source file not found, loading 0 rows"
                    );
                    Ok((EntityOutcome::Missing, 0))
                },
                Err(e) if e.is_rejection() => {
                    let reason = e.to_string();
                    match self.config.on_reject {
                        RejectPolicy::Abort => Err(e),
                        RejectPolicy::Continue => {
                            warn!(entity = %entity, "Rejected, continuing: {}", reason);
                            Ok((EntityOutcome::Rejected { reason }, 0))
                        },
                    }
                },
                Err(e) => Err(e),
            };

            match outcome {
                Ok((outcome, coerced_dates)) => report.record(EntityReport {
                    entity,
                    outcome,
                    coerced_dates,
                    elapsed_secs: started.elapsed().as_secs_f64(),
                }),
                Err(e) => {
                    if e.is_rejection() {
                        report.record(EntityReport {
                            entity,
                            outcome: EntityOutcome::Rejected {
                                reason: e.to_string(),
                            },
                            coerced_dates: 0,
                            elapsed_secs: started.elapsed().as_secs_f64(),
                        });
                    }
                    return Err(e);
                },
            }
        }

        self.transition(LoadState::Verifying);
        let expected: BTreeMap<Entity, u64> = Entity::ALL
            .into_iter()
            .map(|entity| {
                let before = baseline.get(&entity).copied().unwrap_or(0);
                (entity, before + report.rows_loaded(entity))
            })
            .collect();

        let verification = verify(&mut self.sink, &expected).await?;
        info!("Verification\n{}", verification.render_table());
        report.verification = Some(verification);

        Ok(())
    }

    /// Empty every table, dependents first, in a single transaction
    async fn purge_all(&mut self) -> Result<()> {
        self.sink
            .begin()
            .await
            .map_err(|e| LoadError::ConnectionLost {
                entity: None,
                reason: e.to_string(),
            })?;

        for entity in Entity::purge_order() {
            if let Err(e) = self.sink.purge(entity).await {
                self.rollback_after(entity, &e).await;
                return Err(LoadError::from_sink(entity, 0, e));
            }
            debug!(entity = %entity, "Purged");
        }

        self.sink
            .commit()
            .await
            .map_err(|e| LoadError::ConnectionLost {
                entity: None,
                reason: e.to_string(),
            })?;
        info!("Purged all tables");
        Ok(())
    }

    async fn current_counts(&mut self) -> Result<BTreeMap<Entity, u64>> {
        let mut counts = BTreeMap::new();
        for entity in Entity::ALL {
            let count = self
                .sink
                .count(entity)
                .await
                .map_err(|e| LoadError::from_sink(entity, 0, e))?;
            counts.insert(entity, count);
        }
        debug!(?counts, "Row counts before append");
        Ok(counts)
    }

    async fn load_entity(&mut self, entity: Entity, rows_so_far: u64) -> Result<EntityLoad> {
        debug!(entity = %entity, source = %self.source.describe(entity), "Fetching batch");
        let prepared = prepare_entity(&self.source, &self.normalizer, &self.config.transfer, entity)?;
        let encoded = &prepared.encoded;

        self.sink
            .begin()
            .await
            .map_err(|e| LoadError::from_sink(entity, rows_so_far, e))?;

        let request = IngestRequest {
            entity,
            columns: &encoded.columns,
            payload: &encoded.payload,
            format: &self.config.transfer,
        };
        let rows = match self.sink.ingest(request).await {
            Ok(rows) => rows,
            Err(e) => {
                self.rollback_after(entity, &e).await;
                return Err(LoadError::from_sink(entity, rows_so_far, e));
            },
        };

        self.sink
            .commit()
            .await
            .map_err(|e| LoadError::from_sink(entity, rows_so_far, e))?;

        if rows != encoded.rows as u64 {
            warn!(
                entity = %entity,
                sent = encoded.rows,
                accepted = rows,
                "Sink accepted a different number of rows than were sent"
            );
        }

        Ok(EntityLoad {
            rows,
            coerced_dates: prepared.coerced_dates,
        })
    }

    /// Roll back after a failed step; a lost connection has nothing to roll back.
    async fn rollback_after(&mut self, entity: Entity, cause: &SinkError) {
        if matches!(cause, SinkError::Connection(_)) {
            return;
        }
        if let Err(e) = self.sink.rollback().await {
            warn!(entity = %entity, error = %e, "Rollback failed");
        } else {
            debug!(entity = %entity, "Rolled back");
        }
    }
}

/// A batch ready for the sink
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub encoded: EncodedBatch,
    /// Date values coerced to null during normalization
    pub coerced_dates: usize,
}

/// Fetch, normalize, check, select and encode one entity's batch.
pub fn prepare_entity<Src: BatchSource + ?Sized>(
    source: &Src,
    normalizer: &Normalizer,
    format: &TransferFormat,
    entity: Entity,
) -> Result<PreparedBatch> {
    let descriptor = entity.descriptor();
    let batch = source.fetch(entity)?;

    let normalized = normalizer.normalize(&batch, descriptor);

    let violations = check_rules(descriptor, &normalized);
    if !violations.is_empty() {
        return Err(LoadError::InvariantViolation { entity, violations });
    }

    let columns = select_columns(descriptor, normalized.columns())?;
    let encoded = format
        .encode(&normalized, &columns)
        .map_err(|e| LoadError::SchemaMismatch {
            entity,
            reason: e.to_string(),
        })?;
    debug!(
        entity = %entity,
        rows = encoded.rows,
        bytes = encoded.payload.len(),
        columns = ?encoded.columns,
        "Encoded batch"
    );

    Ok(PreparedBatch {
        encoded,
        coerced_dates: normalized.stats.coerced_dates.iter().map(|(_, n)| n).sum(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::sink::{MemorySink, SinkResult};
    use crate::source::MemorySource;
    use async_trait::async_trait;

    /// Reports one more child row than was loaded, the way an audit trigger would
    struct AuditTriggerSink(MemorySink);

    #[async_trait]
    impl BulkSink for AuditTriggerSink {
        fn describe(&self) -> String {
            "audited in-memory sink".to_string()
        }

        async fn ping(&mut self) -> SinkResult<()> {
            self.0.ping().await
        }

        async fn begin(&mut self) -> SinkResult<()> {
            self.0.begin().await
        }

        async fn commit(&mut self) -> SinkResult<()> {
            self.0.commit().await
        }

        async fn rollback(&mut self) -> SinkResult<()> {
            self.0.rollback().await
        }

        async fn purge(&mut self, entity: Entity) -> SinkResult<()> {
            self.0.purge(entity).await
        }

        async fn ingest(&mut self, request: IngestRequest<'_>) -> SinkResult<u64> {
            self.0.ingest(request).await
        }

        async fn count(&mut self, entity: Entity) -> SinkResult<u64> {
            let rows = self.0.count(entity).await?;
            Ok(if entity == Entity::Child { rows + 1 } else { rows })
        }
    }

    fn batch(headers: &[&str], rows: &[&[&str]]) -> Batch {
        Batch::from_rows(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| {
                    r.iter()
                        .map(|c| (*c != "NULL").then(|| c.to_string()))
                        .collect()
                })
                .collect(),
        )
    }

    fn children() -> Batch {
        batch(
            &["child_id", "date_of_birth", "gender", "race", "ethnicity", "initial_county"],
            &[
                &["1", "2015-03-04", "Female", "White", "Non-Hispanic", "Cook"],
                &["2", "03/05/2012", "Male", "Black", "Hispanic", "Lake"],
            ],
        )
    }

    fn config(mode: LoadMode) -> LoaderConfig {
        LoaderConfig::new(mode)
    }

    #[tokio::test]
    async fn test_run_loads_and_verifies() {
        let source = MemorySource::new().with(Entity::Child, children());
        let mut orchestrator = Orchestrator::new(config(LoadMode::Replace), MemorySink::new(), source);

        let report = orchestrator.run().await.unwrap();

        assert_eq!(orchestrator.state(), LoadState::Done);
        assert_eq!(report.rows_loaded(Entity::Child), 2);
        assert_eq!(report.total_rows, 2);
        assert!(report.is_success());
        assert_eq!(
            report.entity(Entity::Note).map(|r| &r.outcome),
            Some(&EntityOutcome::Missing)
        );

        let rows = orchestrator.sink().rows(Entity::Child);
        assert_eq!(rows[1].get("date_of_birth"), Some("2012-03-05"));
    }

    #[tokio::test]
    async fn test_count_mismatch_does_not_fail_run() {
        let source = MemorySource::new().with(Entity::Child, children());
        let sink = AuditTriggerSink(MemorySink::new());
        let mut orchestrator = Orchestrator::new(config(LoadMode::Replace), sink, source);

        let report = orchestrator.run().await.unwrap();

        assert_eq!(orchestrator.state(), LoadState::Done);
        assert!(report.is_success());
        assert!(report.error.is_none());
        assert!(report.has_count_mismatch());
        let verification = report.verification.as_ref().unwrap();
        assert_eq!(verification.actual(Entity::Child), Some(3));
        assert_eq!(verification.mismatches().count(), 1);
    }

    #[tokio::test]
    async fn test_connection_loss_fails_run_with_partial_report() {
        let source = MemorySource::new().with(Entity::Child, children());
        let sink = MemorySink::new().with_fault(Entity::Child, SinkError::Connection("reset".to_string()));
        let mut orchestrator = Orchestrator::new(config(LoadMode::Replace), sink, source);

        let failure = orchestrator.run().await.unwrap_err();

        assert_eq!(orchestrator.state(), LoadState::Failed);
        assert!(matches!(
            failure.error,
            LoadError::ConnectionLost { entity: Some(Entity::Child), .. }
        ));
        assert_eq!(failure.report.entities.len(), 7);
        assert!(failure.report.error.is_some());
        assert_eq!(
            failure.report.entity(Entity::Case).map(|r| &r.outcome),
            Some(&EntityOutcome::NotReached)
        );
    }

    #[tokio::test]
    async fn test_schema_error_aborts_even_with_continue() {
        let mut config = config(LoadMode::Replace);
        config.on_reject = RejectPolicy::Continue;
        let source = MemorySource::new().with(Entity::Child, children());
        let sink = MemorySink::new().with_fault(Entity::Child, SinkError::Schema("no such table".to_string()));
        let mut orchestrator = Orchestrator::new(config, sink, source);

        let failure = orchestrator.run().await.unwrap_err();
        assert!(matches!(failure.error, LoadError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LoadState::Loading(Entity::Episode).to_string(), "loading(episodes)");
        assert_eq!(LoadState::Idle.to_string(), "idle");
    }
}
