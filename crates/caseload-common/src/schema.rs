//! Declarative schema for the seven child-welfare entities
//!
//! Every consumer (column selection, normalization, invariant checks, sinks
//! and the generator) reads the same per-entity descriptor instead of keeping
//! its own list of special cases. Column order in a descriptor is the column
//! order of the entity's CSV file.

use serde::{Deserialize, Serialize};

use crate::error::CommonError;

// ============================================================================
// Entities
// ============================================================================

/// One of the seven logical record types.
///
/// Variant order is the foreign-key dependency order: every entity only
/// references entities declared before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Child,
    Case,
    CaseChildLink,
    Episode,
    Placement,
    Allegation,
    Note,
}

impl Entity {
    /// All entities in dependency (load) order.
    pub const ALL: [Entity; 7] = [
        Entity::Child,
        Entity::Case,
        Entity::CaseChildLink,
        Entity::Episode,
        Entity::Placement,
        Entity::Allegation,
        Entity::Note,
    ];

    /// Target table name.
    pub fn table_name(self) -> &'static str {
        self.descriptor().table
    }

    /// Source file name inside a data directory (e.g. `children.csv`).
    pub fn file_name(self) -> String {
        format!("{}.csv", self.table_name())
    }

    /// Position in the dependency order (0 = no parents).
    pub fn dependency_rank(self) -> usize {
        self as usize
    }

    /// Entities in reverse dependency order, the only safe order to empty them.
    pub fn purge_order() -> impl Iterator<Item = Entity> {
        Self::ALL.into_iter().rev()
    }

    /// Declarative descriptor for this entity.
    pub fn descriptor(self) -> &'static EntityDescriptor {
        &SCHEMA[self as usize]
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

impl std::str::FromStr for Entity {
    type Err = CommonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        let wanted = wanted.strip_suffix(".csv").unwrap_or(&wanted);
        match wanted {
            "children" | "child" => Ok(Entity::Child),
            "cases" | "case" => Ok(Entity::Case),
            "case_child" | "case_child_link" => Ok(Entity::CaseChildLink),
            "episodes" | "episode" => Ok(Entity::Episode),
            "placements" | "placement" => Ok(Entity::Placement),
            "allegations" | "allegation" => Ok(Entity::Allegation),
            "notes" | "note" => Ok(Entity::Note),
            _ => Err(CommonError::UnknownEntity(s.to_string())),
        }
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Semantic kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// The entity's own identity column
    Identity,
    /// Reference to another entity's identity
    ForeignKey(Entity),
    /// Plain whole-number attribute
    Integer,
    /// Calendar date without a time component
    Date,
    /// Free or categorical text
    Text,
}

/// A single column of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

impl ColumnDef {
    const fn new(name: &'static str, kind: ColumnKind, nullable: bool) -> Self {
        Self {
            name,
            kind,
            nullable,
        }
    }

    /// True for identity and foreign-key columns.
    pub fn is_key(&self) -> bool {
        matches!(self.kind, ColumnKind::Identity | ColumnKind::ForeignKey(_))
    }
}

/// "A row has a date iff its status is closed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusDateRule {
    pub status_column: &'static str,
    pub closed_value: &'static str,
    pub date_column: &'static str,
}

impl StatusDateRule {
    /// Check one row. `status` and `date` are the cells' values, `None` when missing.
    pub fn holds(&self, status: Option<&str>, date: Option<&str>) -> bool {
        let closed = status == Some(self.closed_value);
        closed == date.is_some()
    }
}

/// Per-entity schema descriptor.
#[derive(Debug)]
pub struct EntityDescriptor {
    pub entity: Entity,
    pub table: &'static str,
    /// Own identity column, generated by the sink. `None` for pure association tables.
    pub identity: Option<&'static str>,
    /// Columns of the source file, in file order.
    pub columns: &'static [ColumnDef],
    pub rules: &'static [StatusDateRule],
}

impl EntityDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    pub fn is_date_column(&self, name: &str) -> bool {
        self.column(name)
            .is_some_and(|c| c.kind == ColumnKind::Date)
    }

    /// Foreign-key columns with the entity each one references.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&'static str, Entity)> + '_ {
        self.columns.iter().filter_map(|c| match c.kind {
            ColumnKind::ForeignKey(parent) => Some((c.name, parent)),
            _ => None,
        })
    }

    /// Entities this one references.
    pub fn parents(&self) -> Vec<Entity> {
        let mut parents: Vec<Entity> = self.foreign_keys().map(|(_, e)| e).collect();
        parents.sort();
        parents.dedup();
        parents
    }
}

use ColumnKind::{Date, ForeignKey, Identity, Integer, Text};

const CHILD_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("child_id", Identity, false),
    ColumnDef::new("date_of_birth", Date, false),
    ColumnDef::new("gender", Text, false),
    ColumnDef::new("race", Text, false),
    ColumnDef::new("ethnicity", Text, false),
    ColumnDef::new("initial_county", Text, false),
];

const CASE_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("case_id", Identity, false),
    ColumnDef::new("case_number", Text, false),
    ColumnDef::new("referral_date", Date, false),
    ColumnDef::new("case_type", Text, false),
    ColumnDef::new("intake_county", Text, false),
    ColumnDef::new("case_status", Text, false),
    ColumnDef::new("closure_date", Date, true),
];

const CASE_CHILD_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("case_id", ForeignKey(Entity::Case), false),
    ColumnDef::new("child_id", ForeignKey(Entity::Child), false),
    ColumnDef::new("role_in_case", Text, false),
];

const EPISODE_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("episode_id", Identity, false),
    ColumnDef::new("child_id", ForeignKey(Entity::Child), false),
    ColumnDef::new("entry_date", Date, false),
    ColumnDef::new("exit_date", Date, true),
    ColumnDef::new("removal_reason", Text, false),
    ColumnDef::new("entry_age_days", Integer, false),
    ColumnDef::new("episode_status", Text, false),
    ColumnDef::new("goal", Text, false),
];

const PLACEMENT_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("placement_id", Identity, false),
    ColumnDef::new("episode_id", ForeignKey(Entity::Episode), false),
    ColumnDef::new("placement_start", Date, false),
    ColumnDef::new("placement_end", Date, true),
    ColumnDef::new("placement_type", Text, false),
    ColumnDef::new("placement_county", Text, false),
    ColumnDef::new("provider_id", Text, false),
];

const ALLEGATION_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("case_id", ForeignKey(Entity::Case), false),
    ColumnDef::new("child_id", ForeignKey(Entity::Child), false),
    ColumnDef::new("allegation_type", Text, false),
    ColumnDef::new("allegation_date", Date, false),
    ColumnDef::new("finding", Text, false),
];

const NOTE_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("case_id", ForeignKey(Entity::Case), true),
    ColumnDef::new("child_id", ForeignKey(Entity::Child), false),
    ColumnDef::new("episode_id", ForeignKey(Entity::Episode), false),
    ColumnDef::new("note_date", Date, false),
    ColumnDef::new("note_type", Text, false),
    ColumnDef::new("note_text", Text, false),
    ColumnDef::new("author", Text, false),
];

/// Descriptors indexed by `Entity as usize`.
static SCHEMA: [EntityDescriptor; 7] = [
    EntityDescriptor {
        entity: Entity::Child,
        table: "children",
        identity: Some("child_id"),
        columns: CHILD_COLUMNS,
        rules: &[],
    },
    EntityDescriptor {
        entity: Entity::Case,
        table: "cases",
        identity: Some("case_id"),
        columns: CASE_COLUMNS,
        rules: &[StatusDateRule {
            status_column: "case_status",
            closed_value: "closed",
            date_column: "closure_date",
        }],
    },
    EntityDescriptor {
        entity: Entity::CaseChildLink,
        table: "case_child",
        identity: None,
        columns: CASE_CHILD_COLUMNS,
        rules: &[],
    },
    EntityDescriptor {
        entity: Entity::Episode,
        table: "episodes",
        identity: Some("episode_id"),
        columns: EPISODE_COLUMNS,
        rules: &[StatusDateRule {
            status_column: "episode_status",
            closed_value: "closed",
            date_column: "exit_date",
        }],
    },
    EntityDescriptor {
        entity: Entity::Placement,
        table: "placements",
        identity: Some("placement_id"),
        columns: PLACEMENT_COLUMNS,
        rules: &[],
    },
    EntityDescriptor {
        entity: Entity::Allegation,
        table: "allegations",
        identity: Some("allegation_id"),
        columns: ALLEGATION_COLUMNS,
        rules: &[],
    },
    EntityDescriptor {
        entity: Entity::Note,
        table: "notes",
        identity: Some("note_id"),
        columns: NOTE_COLUMNS,
        rules: &[],
    },
];
