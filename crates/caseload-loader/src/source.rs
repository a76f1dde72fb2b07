//! Where per-entity batches come from

use caseload_common::Entity;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::batch::Batch;
use crate::error::{LoadError, Result};

/// Supplies one raw batch per entity
pub trait BatchSource: Send {
    /// Batch for `entity`, or [`LoadError::SourceMissing`] when there is none
    fn fetch(&self, entity: Entity) -> Result<Batch>;

    /// Where `entity` is read from, for log lines
    fn describe(&self, entity: Entity) -> String;
}

/// Directory of `<table>.csv` files with a header row
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    null_markers: Vec<String>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>, null_markers: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            null_markers,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, entity: Entity) -> PathBuf {
        self.dir.join(entity.file_name())
    }
}

impl BatchSource for DirectorySource {
    fn fetch(&self, entity: Entity) -> Result<Batch> {
        let path = self.path_for(entity);
        debug!(entity = %entity, path = %path.display(), "Reading source file");

        Batch::read_csv(&path, &self.null_markers).map_err(|e| match e.kind() {
            csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                LoadError::SourceMissing { entity, path }
            },
            _ => LoadError::Source {
                entity,
                reason: e.to_string(),
            },
        })
    }

    fn describe(&self, entity: Entity) -> String {
        self.path_for(entity).display().to_string()
    }
}

/// Batches held in memory, keyed by entity; insertion order is irrelevant
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    batches: HashMap<Entity, Batch>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, entity: Entity, batch: Batch) -> Self {
        self.insert(entity, batch);
        self
    }

    pub fn insert(&mut self, entity: Entity, batch: Batch) {
        self.batches.insert(entity, batch);
    }

    pub fn remove(&mut self, entity: Entity) -> Option<Batch> {
        self.batches.remove(&entity)
    }
}

impl BatchSource for MemorySource {
    fn fetch(&self, entity: Entity) -> Result<Batch> {
        self.batches
            .get(&entity)
            .cloned()
            .ok_or_else(|| LoadError::SourceMissing {
                entity,
                path: PathBuf::from(entity.file_name()),
            })
    }

    fn describe(&self, entity: Entity) -> String {
        format!("memory:{}", entity.table_name())
    }
}
