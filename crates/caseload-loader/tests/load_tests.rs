//! End-to-end load runs over the in-memory sink

mod common;

use caseload_common::Entity;
use caseload_loader::batch::Batch;
use caseload_loader::report::EntityOutcome;
use caseload_loader::sink::{BulkSink, FaultPoint, MemorySink, SinkError};
use caseload_loader::source::{BatchSource, DirectorySource, MemorySource};
use caseload_loader::{LoadError, LoadMode, LoadState, LoaderConfig, Orchestrator, RejectPolicy};
use caseload_gen::{generate, write_csv};
use common::{loader_config, small_config, written_dataset};
use tempfile::TempDir;

fn directory_source(config: &LoaderConfig) -> DirectorySource {
    DirectorySource::new(&config.data_dir, config.null_markers.clone())
}

fn cells(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}

fn headers(entity: Entity) -> Vec<String> {
    entity.descriptor().column_names().map(String::from).collect()
}

#[tokio::test]
async fn test_replace_load_matches_generated_dataset() {
    let (dir, dataset) = written_dataset();
    let config = loader_config(LoadMode::Replace, dir.path());
    let source = directory_source(&config);
    let mut orchestrator = Orchestrator::new(config, MemorySink::new(), source);

    let report = orchestrator.run().await.unwrap();

    assert!(report.is_success());
    assert_eq!(orchestrator.state(), LoadState::Done);
    for (entity, rows) in dataset.counts() {
        assert_eq!(report.rows_loaded(entity), rows as u64, "{}", entity);
    }
    assert_eq!(
        report.total_rows,
        dataset.counts().iter().map(|(_, n)| *n as u64).sum::<u64>()
    );
    assert_eq!(orchestrator.sink().commit_log(), &Entity::ALL);

    // Identities are regenerated densely and line up with the file's keys
    let children = orchestrator.sink().rows(Entity::Child);
    assert_eq!(children[0].identity, Some(1));
    assert_eq!(
        children[0].get("date_of_birth"),
        Some(dataset.children[0].date_of_birth.to_string().as_str())
    );
}

#[tokio::test]
async fn test_dependency_order_ignores_source_order() {
    let (dir, _) = written_dataset();
    let config = loader_config(LoadMode::Replace, dir.path());
    let files = directory_source(&config);

    // Insert children last so a naive iteration would see episodes first
    let mut source = MemorySource::new();
    for entity in Entity::ALL.iter().rev() {
        source.insert(*entity, files.fetch(*entity).unwrap());
    }

    let mut orchestrator = Orchestrator::new(config, MemorySink::new(), source);
    orchestrator.run().await.unwrap();

    let log = orchestrator.sink().commit_log();
    let position = |entity| log.iter().position(|e| *e == entity).unwrap();
    assert!(position(Entity::Child) < position(Entity::Episode));
    assert!(position(Entity::Episode) < position(Entity::Placement));
    assert!(position(Entity::Case) < position(Entity::CaseChildLink));
}

#[tokio::test]
async fn test_missing_allegations_file_loads_zero_rows() {
    let (dir, dataset) = written_dataset();
    std::fs::remove_file(dir.path().join("allegations.csv")).unwrap();

    let config = loader_config(LoadMode::Replace, dir.path());
    let source = directory_source(&config);
    let mut orchestrator = Orchestrator::new(config, MemorySink::new(), source);

    let report = orchestrator.run().await.unwrap();

    assert!(report.is_success());
    assert_eq!(
        report.entity(Entity::Allegation).map(|r| &r.outcome),
        Some(&EntityOutcome::Missing)
    );
    assert_eq!(report.rows_loaded(Entity::Allegation), 0);
    assert_eq!(report.rows_loaded(Entity::Note), dataset.notes.len() as u64);
    assert_eq!(
        report.verification.as_ref().and_then(|v| v.actual(Entity::Allegation)),
        Some(0)
    );
}

fn closed_case_without_date() -> MemorySource {
    let children = Batch::from_rows(
        headers(Entity::Child),
        vec![cells(&["1", "2015-06-01", "Female", "White", "Non-Hispanic", "Cook"])],
    );
    let mut case = cells(&["1", "CASE-000001", "2024-01-10", "investigation", "Cook", "closed", ""]);
    case[6] = None;
    let cases = Batch::from_rows(headers(Entity::Case), vec![case]);
    let links = Batch::from_rows(headers(Entity::CaseChildLink), vec![cells(&["1", "1", "victim"])]);

    MemorySource::new()
        .with(Entity::Child, children)
        .with(Entity::Case, cases)
        .with(Entity::CaseChildLink, links)
}

#[tokio::test]
async fn test_closed_case_without_closure_date_aborts() {
    let config = LoaderConfig::new(LoadMode::Replace);
    let mut orchestrator = Orchestrator::new(config, MemorySink::new(), closed_case_without_date());

    let failure = orchestrator.run().await.unwrap_err();

    match &failure.error {
        LoadError::InvariantViolation { entity, violations } => {
            assert_eq!(*entity, Entity::Case);
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].status.as_deref(), Some("closed"));
            assert_eq!(violations[0].date, None);
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(orchestrator.state(), LoadState::Failed);

    // Children committed before the failure stay; nothing of cases was sent
    assert_eq!(orchestrator.sink().rows(Entity::Child).len(), 1);
    assert!(orchestrator.sink().rows(Entity::Case).is_empty());
    assert_eq!(failure.report.rows_loaded(Entity::Child), 1);
    assert_eq!(
        failure.report.entity(Entity::Episode).map(|r| &r.outcome),
        Some(&EntityOutcome::NotReached)
    );
}

#[tokio::test]
async fn test_continue_policy_records_rejections_and_finishes() {
    let mut config = LoaderConfig::new(LoadMode::Replace);
    config.on_reject = RejectPolicy::Continue;
    let mut orchestrator = Orchestrator::new(config, MemorySink::new(), closed_case_without_date());

    let report = orchestrator.run().await.unwrap();

    assert_eq!(orchestrator.state(), LoadState::Done);
    assert!(!report.is_success());
    assert!(matches!(
        report.entity(Entity::Case).map(|r| &r.outcome),
        Some(EntityOutcome::Rejected { .. })
    ));
    // The link points at a case that never loaded, so the sink refuses it too
    assert!(matches!(
        report.entity(Entity::CaseChildLink).map(|r| &r.outcome),
        Some(EntityOutcome::Rejected { .. })
    ));
    assert_eq!(report.rows_loaded(Entity::Child), 1);
    assert!(orchestrator.sink().rows(Entity::CaseChildLink).is_empty());
}

#[tokio::test]
async fn test_literal_null_text_survives_the_trip() {
    let children = Batch::from_rows(
        headers(Entity::Child),
        vec![cells(&["1", "2015-06-01", "Male", "Black", "Hispanic", "Will"])],
    );
    let episodes = Batch::from_rows(
        headers(Entity::Episode),
        vec![{
            let mut row = cells(&["1", "1", "2024-02-01", "", "neglect", "3167", "active", "adoption"]);
            row[3] = None;
            row
        }],
    );
    let mut note = cells(&["", "1", "1", "2024-03-01", "visit", "NULL", "J. Smith"]);
    note[0] = None;
    let notes = Batch::from_rows(headers(Entity::Note), vec![note]);

    let source = MemorySource::new()
        .with(Entity::Child, children)
        .with(Entity::Episode, episodes)
        .with(Entity::Note, notes);
    let mut orchestrator = Orchestrator::new(LoaderConfig::new(LoadMode::Replace), MemorySink::new(), source);

    let report = orchestrator.run().await.unwrap();
    assert!(report.is_success());

    let stored = &orchestrator.sink().rows(Entity::Note)[0];
    assert_eq!(stored.get("note_text"), Some("NULL"));
    assert_eq!(stored.get("case_id"), None);
    assert_eq!(stored.identity, Some(1));
}

#[tokio::test]
async fn test_null_text_in_generated_files_survives_the_trip() {
    let dir = TempDir::new().unwrap();
    let mut dataset = generate(small_config()).unwrap();
    dataset.notes[0].note_text = "NULL";
    write_csv(&dataset, dir.path()).unwrap();

    let config = loader_config(LoadMode::Replace, dir.path());
    let source = directory_source(&config);
    let mut orchestrator = Orchestrator::new(config, MemorySink::new(), source);
    let report = orchestrator.run().await.unwrap();

    assert!(report.is_success());
    let notes = orchestrator.sink().rows(Entity::Note);
    assert_eq!(notes[0].get("note_text"), Some("NULL"));
    assert_eq!(
        notes[0].get("case_id").map(String::from),
        dataset.notes[0].case_id.map(|id| id.to_string())
    );
}

#[tokio::test]
async fn test_replace_twice_is_idempotent() {
    let (dir, _) = written_dataset();
    let config = loader_config(LoadMode::Replace, dir.path());
    let source = directory_source(&config);
    let mut orchestrator = Orchestrator::new(config, MemorySink::new(), source);

    let first = orchestrator.run().await.unwrap();
    let snapshot: Vec<_> = Entity::ALL
        .iter()
        .map(|e| orchestrator.sink().rows(*e).to_vec())
        .collect();
    let second = orchestrator.run().await.unwrap();

    assert!(second.is_success());
    assert_eq!(first.total_rows, second.total_rows);
    assert_eq!(first.verification, second.verification);
    for (entity, before) in Entity::ALL.iter().zip(snapshot) {
        assert_eq!(orchestrator.sink().rows(*entity), before.as_slice(), "{}", entity);
    }
}

#[tokio::test]
async fn test_append_adds_to_existing_rows() {
    let (dir, dataset) = written_dataset();

    let config = loader_config(LoadMode::Replace, dir.path());
    let source = directory_source(&config);
    let mut orchestrator = Orchestrator::new(config, MemorySink::new(), source);
    orchestrator.run().await.unwrap();
    let sink = orchestrator.into_sink();

    let config = loader_config(LoadMode::Append, dir.path());
    let source = directory_source(&config);
    let mut orchestrator = Orchestrator::new(config, sink, source);
    let report = orchestrator.run().await.unwrap();

    assert!(report.is_success(), "verification expects baseline + loaded");
    let children = orchestrator.sink_mut().count(Entity::Child).await.unwrap();
    assert_eq!(children, 2 * dataset.children.len() as u64);
}

#[tokio::test]
async fn test_failed_purge_leaves_every_table_intact() {
    let (dir, _) = written_dataset();
    let config = loader_config(LoadMode::Replace, dir.path());
    let source = directory_source(&config);
    let mut orchestrator = Orchestrator::new(config, MemorySink::new(), source);
    orchestrator.run().await.unwrap();

    let mut sink = orchestrator.into_sink();
    let mut before = Vec::new();
    for entity in Entity::ALL {
        before.push(sink.count(entity).await.unwrap());
    }
    assert!(before.iter().all(|n| *n > 0));

    // Episodes fail after their dependents were already purged
    let sink = sink.with_fault_at(
        FaultPoint::Purge,
        Entity::Episode,
        SinkError::Rejected("canceling statement due to lock timeout".to_string()),
    );
    let config = loader_config(LoadMode::Replace, dir.path());
    let source = directory_source(&config);
    let mut orchestrator = Orchestrator::new(config, sink, source);

    let failure = orchestrator.run().await.unwrap_err();

    assert_eq!(orchestrator.state(), LoadState::Failed);
    assert_eq!(failure.error.entity(), Some(Entity::Episode));
    assert_eq!(failure.report.total_rows, 0);
    let sink = orchestrator.sink_mut();
    assert!(!sink.in_transaction());
    for (entity, expected) in Entity::ALL.into_iter().zip(before) {
        assert_eq!(sink.count(entity).await.unwrap(), expected, "{}", entity);
    }
}
