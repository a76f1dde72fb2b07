//! In-memory sink
//!
//! Behaves like a referential-integrity-enforcing database for the seven
//! tables: it decodes the transfer stream with the same [`TransferFormat`],
//! assigns dense identities, enforces NOT NULL, integer and date typing,
//! foreign keys and status/date rules, and applies each ingest all-or-nothing.
//! Transactions work on a snapshot that replaces the committed state on
//! commit. Backs `caseload load --dry-run` and the integration tests.

use async_trait::async_trait;
use caseload_common::{ColumnKind, Entity};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use super::{BulkSink, IngestRequest, SinkError, SinkResult};

/// A stored row: sink-assigned identity plus every descriptor column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub identity: Option<i64>,
    pub values: BTreeMap<String, Option<String>>,
}

impl StoredRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_deref())
    }
}

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<StoredRow>,
    last_identity: i64,
}

#[derive(Debug, Clone, Default)]
struct Store {
    tables: BTreeMap<Entity, Table>,
    /// Entities ingested since the last commit
    pending: Vec<Entity>,
}

impl Store {
    fn rows(&self, entity: Entity) -> &[StoredRow] {
        self.tables
            .get(&entity)
            .map(|t| t.rows.as_slice())
            .unwrap_or_default()
    }

    fn identities(&self, entity: Entity) -> HashSet<i64> {
        self.rows(entity).iter().filter_map(|r| r.identity).collect()
    }
}

/// Sink operation a fault can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Ingest,
    Purge,
}

/// In-process [`BulkSink`]
#[derive(Debug, Default)]
pub struct MemorySink {
    committed: Store,
    working: Option<Store>,
    commit_log: Vec<Entity>,
    faults: HashMap<(FaultPoint, Entity), SinkError>,
    closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every ingest of `entity` fail with `error`. A `Connection` error
    /// also closes the session.
    pub fn with_fault(self, entity: Entity, error: SinkError) -> Self {
        self.with_fault_at(FaultPoint::Ingest, entity, error)
    }

    /// Make every `point` operation on `entity` fail with `error`
    pub fn with_fault_at(mut self, point: FaultPoint, entity: Entity, error: SinkError) -> Self {
        self.faults.insert((point, entity), error);
        self
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Committed rows of `entity`
    pub fn rows(&self, entity: Entity) -> &[StoredRow] {
        self.committed.rows(entity)
    }

    /// Entities in the order their ingests were committed
    pub fn commit_log(&self) -> &[Entity] {
        &self.commit_log
    }

    pub fn in_transaction(&self) -> bool {
        self.working.is_some()
    }

    fn check_open(&self) -> SinkResult<()> {
        if self.closed {
            return Err(SinkError::Connection("session closed".to_string()));
        }
        Ok(())
    }

    fn trip_fault(&mut self, point: FaultPoint, entity: Entity) -> SinkResult<()> {
        let Some(fault) = self.faults.get(&(point, entity)).cloned() else {
            return Ok(());
        };
        if matches!(fault, SinkError::Connection(_)) {
            self.closed = true;
            self.working = None;
        }
        Err(fault)
    }

    fn store(&self) -> &Store {
        self.working.as_ref().unwrap_or(&self.committed)
    }

    /// Run `op` against the open transaction, or as its own autocommit unit.
    fn apply<T>(&mut self, op: impl FnOnce(&mut Store) -> SinkResult<T>) -> SinkResult<T> {
        match self.working.as_mut() {
            Some(working) => op(working),
            None => {
                let mut scratch = self.committed.clone();
                let out = op(&mut scratch)?;
                self.commit_log.append(&mut scratch.pending);
                self.committed = scratch;
                Ok(out)
            },
        }
    }
}

fn purge_store(store: &mut Store, entity: Entity) -> Vec<Entity> {
    // TRUNCATE ... CASCADE semantics: also empty everything that references
    // a truncated table, transitively.
    let mut truncated = vec![entity];
    for candidate in Entity::ALL {
        if !truncated.contains(&candidate)
            && candidate
                .descriptor()
                .parents()
                .iter()
                .any(|p| truncated.contains(p))
        {
            truncated.push(candidate);
        }
    }

    for target in &truncated {
        store.tables.insert(*target, Table::default());
    }
    truncated
}

fn ingest_store(store: &mut Store, request: IngestRequest<'_>) -> SinkResult<u64> {
    let entity = request.entity;
    let descriptor = entity.descriptor();

    for column in request.columns {
        if descriptor.column(column).is_none() && Some(column.as_str()) != descriptor.identity {
            return Err(SinkError::Schema(format!(
                "column \"{}\" of relation \"{}\" does not exist",
                column, descriptor.table
            )));
        }
    }

    let decoded = request
        .format
        .decode(request.payload)
        .map_err(|e| SinkError::Rejected(e.to_string()))?;

    let parents: HashMap<&str, (Entity, HashSet<i64>)> = descriptor
        .foreign_keys()
        .map(|(column, parent)| (column, (parent, store.identities(parent))))
        .collect();

    let mut last_identity = store.tables.get(&entity).map(|t| t.last_identity).unwrap_or(0);
    let mut new_rows = Vec::with_capacity(decoded.len());

    for (i, cells) in decoded.into_iter().enumerate() {
        let line = i + 1;
        if cells.len() != request.columns.len() {
            return Err(SinkError::Rejected(format!(
                "line {}: expected {} fields, found {}",
                line,
                request.columns.len(),
                cells.len()
            )));
        }

        let mut supplied: HashMap<&str, Option<String>> = request
            .columns
            .iter()
            .map(String::as_str)
            .zip(cells)
            .collect();

        let identity = match descriptor.identity {
            None => None,
            Some(column) => match supplied.remove(column).flatten() {
                Some(raw) => Some(parse_integer(&raw, column, line)?),
                None => {
                    last_identity += 1;
                    Some(last_identity)
                },
            },
        };

        let mut values = BTreeMap::new();
        for column in descriptor.columns {
            if Some(column.name) == descriptor.identity {
                continue;
            }
            let value = supplied.remove(column.name).flatten();

            match (&value, column.kind) {
                (None, _) if !column.nullable => {
                    return Err(SinkError::Rejected(format!(
                        "line {}: null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                        line, column.name, descriptor.table
                    )));
                },
                (None, _) => {},
                (Some(raw), ColumnKind::ForeignKey(parent)) => {
                    let key = parse_integer(raw, column.name, line)?;
                    let known = parents
                        .get(column.name)
                        .is_some_and(|(_, ids)| ids.contains(&key));
                    if !known {
                        return Err(SinkError::Rejected(format!(
                            "line {}: insert on \"{}\" violates foreign key: {}={} is not present in \"{}\"",
                            line,
                            descriptor.table,
                            column.name,
                            key,
                            parent.table_name()
                        )));
                    }
                },
                (Some(raw), ColumnKind::Integer | ColumnKind::Identity) => {
                    parse_integer(raw, column.name, line)?;
                },
                (Some(raw), ColumnKind::Date) => {
                    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                        SinkError::Rejected(format!(
                            "line {}: invalid input syntax for type date: \"{}\" in column \"{}\"",
                            line, raw, column.name
                        ))
                    })?;
                },
                (Some(_), ColumnKind::Text) => {},
            }

            values.insert(column.name.to_string(), value);
        }

        for rule in descriptor.rules {
            let status = values.get(rule.status_column).and_then(|v| v.as_deref());
            let date = values.get(rule.date_column).and_then(|v| v.as_deref());
            if !rule.holds(status, date) {
                return Err(SinkError::Rejected(format!(
                    "line {}: new row for relation \"{}\" violates check constraint on {} and {}",
                    line, descriptor.table, rule.status_column, rule.date_column
                )));
            }
        }

        new_rows.push(StoredRow { identity, values });
    }

    let inserted = new_rows.len() as u64;
    let table = store.tables.entry(entity).or_default();
    table.rows.extend(new_rows);
    table.last_identity = last_identity;
    store.pending.push(entity);

    Ok(inserted)
}

fn parse_integer(raw: &str, column: &str, line: usize) -> SinkResult<i64> {
    raw.parse().map_err(|_| {
        SinkError::Rejected(format!(
            "line {}: invalid input syntax for type integer: \"{}\" in column \"{}\"",
            line, raw, column
        ))
    })
}

#[async_trait]
impl BulkSink for MemorySink {
    fn describe(&self) -> String {
        "in-memory sink".to_string()
    }

    async fn ping(&mut self) -> SinkResult<()> {
        self.check_open()
    }

    async fn begin(&mut self) -> SinkResult<()> {
        self.check_open()?;
        if self.working.is_some() {
            return Err(SinkError::Rejected(
                "there is already a transaction in progress".to_string(),
            ));
        }
        self.working = Some(self.committed.clone());
        Ok(())
    }

    async fn commit(&mut self) -> SinkResult<()> {
        self.check_open()?;
        if let Some(mut working) = self.working.take() {
            self.commit_log.append(&mut working.pending);
            self.committed = working;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> SinkResult<()> {
        self.check_open()?;
        self.working = None;
        Ok(())
    }

    async fn purge(&mut self, entity: Entity) -> SinkResult<()> {
        self.check_open()?;
        self.trip_fault(FaultPoint::Purge, entity)?;
        let truncated = self.apply(|store| Ok(purge_store(store, entity)))?;
        debug!(entity = %entity, cascaded = truncated.len() - 1, "Purged");
        Ok(())
    }

    async fn ingest(&mut self, request: IngestRequest<'_>) -> SinkResult<u64> {
        self.check_open()?;
        self.trip_fault(FaultPoint::Ingest, request.entity)?;
        self.apply(|store| ingest_store(store, request))
    }

    async fn count(&mut self, entity: Entity) -> SinkResult<u64> {
        self.check_open()?;
        Ok(self.store().rows(entity).len() as u64)
    }
}
