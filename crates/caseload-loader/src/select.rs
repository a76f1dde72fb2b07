//! Column selection per target entity

use caseload_common::EntityDescriptor;

use crate::error::{LoadError, Result};

/// Ordered list of columns to transfer for an entity.
///
/// Drops exactly the entity's own identity column (the sink generates it) and
/// keeps everything else in source order, foreign keys included. A column the
/// descriptor does not know, or an empty result, is a schema mismatch.
pub fn select_columns(descriptor: &EntityDescriptor, columns: &[String]) -> Result<Vec<String>> {
    if let Some(unknown) = columns
        .iter()
        .find(|c| descriptor.column(c).is_none() && Some(c.as_str()) != descriptor.identity)
    {
        return Err(LoadError::SchemaMismatch {
            entity: descriptor.entity,
            reason: format!("column '{}' is not part of the {} schema", unknown, descriptor.table),
        });
    }

    let selected: Vec<String> = columns
        .iter()
        .filter(|c| Some(c.as_str()) != descriptor.identity)
        .cloned()
        .collect();

    if selected.is_empty() {
        return Err(LoadError::SchemaMismatch {
            entity: descriptor.entity,
            reason: "no columns left to transfer after dropping the identity column".to_string(),
        });
    }

    Ok(selected)
}
