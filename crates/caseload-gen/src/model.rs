//! Row types of the generated dataset
//!
//! Field order is the CSV column order. Missing values serialize as a bare
//! `NULL`; text fields quote themselves when needed, so text that spells
//! `NULL` is written quoted and reads back as text.

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

/// Token written for a missing value
pub const NULL_TOKEN: &str = "NULL";

fn nullable<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: std::fmt::Display,
{
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_str(NULL_TOKEN),
    }
}

/// Text field for a writer that never quotes on its own
fn text<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsRef<str>,
{
    let value = value.as_ref();
    if value == NULL_TOKEN || value.contains([',', '"', '\n', '\r']) {
        serializer.collect_str(&format_args!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        serializer.serialize_str(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildRow {
    pub child_id: i64,
    pub date_of_birth: NaiveDate,
    #[serde(serialize_with = "text")]
    pub gender: &'static str,
    #[serde(serialize_with = "text")]
    pub race: &'static str,
    #[serde(serialize_with = "text")]
    pub ethnicity: &'static str,
    #[serde(serialize_with = "text")]
    pub initial_county: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseRow {
    pub case_id: i64,
    #[serde(serialize_with = "text")]
    pub case_number: String,
    pub referral_date: NaiveDate,
    #[serde(serialize_with = "text")]
    pub case_type: &'static str,
    #[serde(serialize_with = "text")]
    pub intake_county: &'static str,
    #[serde(serialize_with = "text")]
    pub case_status: &'static str,
    #[serde(serialize_with = "nullable")]
    pub closure_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseChildRow {
    pub case_id: i64,
    pub child_id: i64,
    #[serde(serialize_with = "text")]
    pub role_in_case: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeRow {
    pub episode_id: i64,
    pub child_id: i64,
    pub entry_date: NaiveDate,
    #[serde(serialize_with = "nullable")]
    pub exit_date: Option<NaiveDate>,
    #[serde(serialize_with = "text")]
    pub removal_reason: &'static str,
    pub entry_age_days: i64,
    #[serde(serialize_with = "text")]
    pub episode_status: &'static str,
    #[serde(serialize_with = "text")]
    pub goal: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacementRow {
    pub placement_id: i64,
    pub episode_id: i64,
    pub placement_start: NaiveDate,
    #[serde(serialize_with = "nullable")]
    pub placement_end: Option<NaiveDate>,
    #[serde(serialize_with = "text")]
    pub placement_type: &'static str,
    #[serde(serialize_with = "text")]
    pub placement_county: &'static str,
    #[serde(serialize_with = "text")]
    pub provider_id: String,
}

/// `allegation_id` is assigned by the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllegationRow {
    pub case_id: i64,
    pub child_id: i64,
    #[serde(serialize_with = "text")]
    pub allegation_type: &'static str,
    pub allegation_date: NaiveDate,
    #[serde(serialize_with = "text")]
    pub finding: &'static str,
}

/// `note_id` is assigned by the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteRow {
    #[serde(serialize_with = "nullable")]
    pub case_id: Option<i64>,
    pub child_id: i64,
    pub episode_id: i64,
    pub note_date: NaiveDate,
    #[serde(serialize_with = "text")]
    pub note_type: &'static str,
    #[serde(serialize_with = "text")]
    pub note_text: &'static str,
    #[serde(serialize_with = "text")]
    pub author: &'static str,
}

/// The seven generated tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    pub children: Vec<ChildRow>,
    pub cases: Vec<CaseRow>,
    pub case_child: Vec<CaseChildRow>,
    pub episodes: Vec<EpisodeRow>,
    pub placements: Vec<PlacementRow>,
    pub allegations: Vec<AllegationRow>,
    pub notes: Vec<NoteRow>,
}

impl Dataset {
    pub fn child(&self, child_id: i64) -> Option<&ChildRow> {
        usize::try_from(child_id - 1)
            .ok()
            .and_then(|i| self.children.get(i))
            .filter(|c| c.child_id == child_id)
    }

    pub fn case(&self, case_id: i64) -> Option<&CaseRow> {
        usize::try_from(case_id - 1)
            .ok()
            .and_then(|i| self.cases.get(i))
            .filter(|c| c.case_id == case_id)
    }

    pub fn episode(&self, episode_id: i64) -> Option<&EpisodeRow> {
        usize::try_from(episode_id - 1)
            .ok()
            .and_then(|i| self.episodes.get(i))
            .filter(|e| e.episode_id == episode_id)
    }

    /// Row counts in dependency order
    pub fn counts(&self) -> [(caseload_common::Entity, usize); 7] {
        use caseload_common::Entity;
        [
            (Entity::Child, self.children.len()),
            (Entity::Case, self.cases.len()),
            (Entity::CaseChildLink, self.case_child.len()),
            (Entity::Episode, self.episodes.len()),
            (Entity::Placement, self.placements.len()),
            (Entity::Allegation, self.allegations.len()),
            (Entity::Note, self.notes.len()),
        ]
    }
}
