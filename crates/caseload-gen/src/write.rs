//! CSV output, one `<table>.csv` per entity

use caseload_common::Entity;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{GenError, Result};
use crate::model::Dataset;

/// One written file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub entity: Entity,
    pub path: PathBuf,
    pub rows: usize,
}

fn write_table<T: Serialize>(dir: &Path, entity: Entity, rows: &[T]) -> Result<WrittenFile> {
    let path = dir.join(entity.file_name());
    let wrap = |source: csv::Error| GenError::Write {
        path: path.clone(),
        source,
    };

    // Text fields do their own quoting; see `model`
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Never)
        .from_path(&path)
        .map_err(wrap)?;
    for row in rows {
        writer.serialize(row).map_err(wrap)?;
    }
    writer
        .flush()
        .map_err(|e| wrap(csv::Error::from(e)))?;

    info!(entity = %entity, rows = rows.len(), path = %path.display(), "Created file");
    Ok(WrittenFile {
        entity,
        path,
        rows: rows.len(),
    })
}

/// Write all seven tables into `dir`, creating it if needed
pub fn write_csv(dataset: &Dataset, dir: &Path) -> Result<Vec<WrittenFile>> {
    std::fs::create_dir_all(dir).map_err(|source| GenError::OutputDir {
        path: dir.to_path_buf(),
        source,
    })?;

    Ok(vec![
        write_table(dir, Entity::Child, &dataset.children)?,
        write_table(dir, Entity::Case, &dataset.cases)?,
        write_table(dir, Entity::CaseChildLink, &dataset.case_child)?,
        write_table(dir, Entity::Episode, &dataset.episodes)?,
        write_table(dir, Entity::Placement, &dataset.placements)?,
        write_table(dir, Entity::Allegation, &dataset.allegations)?,
        write_table(dir, Entity::Note, &dataset.notes)?,
    ])
}
