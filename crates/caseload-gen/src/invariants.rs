//! Consistency checks over a generated dataset

use caseload_common::Entity;
use std::collections::{BTreeMap, HashSet};

use crate::model::Dataset;

/// One broken invariant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetViolation {
    pub entity: Entity,
    /// 0-based row index within the entity's table
    pub row: usize,
    pub message: String,
}

impl std::fmt::Display for DatasetViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} row {}: {}", self.entity, self.row, self.message)
    }
}

/// Check keys, status/date pairing and date ordering across all tables.
///
/// Returns every violation found; an empty list means the dataset loads
/// cleanly into a schema that enforces the same rules.
pub fn check_invariants(dataset: &Dataset) -> Vec<DatasetViolation> {
    let mut violations = Vec::new();
    let mut fail = |entity: Entity, row: usize, message: String| {
        violations.push(DatasetViolation { entity, row, message });
    };

    for (row, case) in dataset.cases.iter().enumerate() {
        if (case.case_status == "closed") != case.closure_date.is_some() {
            fail(Entity::Case, row, format!("status {} with closure_date {:?}", case.case_status, case.closure_date));
        }
        if case.closure_date.is_some_and(|closed| closed < case.referral_date) {
            fail(Entity::Case, row, "closure_date precedes referral_date".to_string());
        }
    }

    let mut links = HashSet::new();
    let mut cases_of_child: BTreeMap<i64, HashSet<i64>> = BTreeMap::new();
    for (row, link) in dataset.case_child.iter().enumerate() {
        if dataset.case(link.case_id).is_none() {
            fail(Entity::CaseChildLink, row, format!("unknown case_id {}", link.case_id));
        }
        if dataset.child(link.child_id).is_none() {
            fail(Entity::CaseChildLink, row, format!("unknown child_id {}", link.child_id));
        }
        if !links.insert((link.case_id, link.child_id)) {
            fail(Entity::CaseChildLink, row, "duplicate case/child pair".to_string());
        }
        cases_of_child.entry(link.child_id).or_default().insert(link.case_id);
    }

    for (row, episode) in dataset.episodes.iter().enumerate() {
        let Some(child) = dataset.child(episode.child_id) else {
            fail(Entity::Episode, row, format!("unknown child_id {}", episode.child_id));
            continue;
        };
        if (episode.episode_status == "closed") != episode.exit_date.is_some() {
            fail(Entity::Episode, row, format!("status {} with exit_date {:?}", episode.episode_status, episode.exit_date));
        }
        if episode.exit_date.is_some_and(|exit| exit < episode.entry_date) {
            fail(Entity::Episode, row, "exit_date precedes entry_date".to_string());
        }
        let age = (episode.entry_date - child.date_of_birth).num_days();
        if episode.entry_age_days != age {
            fail(Entity::Episode, row, format!("entry_age_days {} but computed {}", episode.entry_age_days, age));
        }
    }

    let mut last_placement: BTreeMap<i64, usize> = BTreeMap::new();
    for (row, placement) in dataset.placements.iter().enumerate() {
        let Some(episode) = dataset.episode(placement.episode_id) else {
            fail(Entity::Placement, row, format!("unknown episode_id {}", placement.episode_id));
            continue;
        };
        if placement.placement_start < episode.entry_date {
            fail(Entity::Placement, row, "placement starts before its episode".to_string());
        }
        if placement.placement_end.is_some_and(|end| end < placement.placement_start) {
            fail(Entity::Placement, row, "placement_end precedes placement_start".to_string());
        }
        last_placement.insert(placement.episode_id, row);
    }
    for (row, placement) in dataset.placements.iter().enumerate() {
        let Some(episode) = dataset.episode(placement.episode_id) else {
            continue;
        };
        let is_last = last_placement.get(&placement.episode_id) == Some(&row);
        let open_allowed = is_last && episode.episode_status == "active";
        if placement.placement_end.is_none() != open_allowed {
            fail(
                Entity::Placement,
                row,
                format!(
                    "placement_end {:?} for {} placement of {} episode",
                    placement.placement_end,
                    if is_last { "final" } else { "earlier" },
                    episode.episode_status
                ),
            );
        }
    }

    for (row, allegation) in dataset.allegations.iter().enumerate() {
        if !links.contains(&(allegation.case_id, allegation.child_id)) {
            fail(
                Entity::Allegation,
                row,
                format!("child {} is not linked to case {}", allegation.child_id, allegation.case_id),
            );
        }
    }

    for (row, note) in dataset.notes.iter().enumerate() {
        match dataset.episode(note.episode_id) {
            Some(episode) if episode.child_id != note.child_id => {
                fail(Entity::Note, row, format!("episode {} belongs to another child", note.episode_id));
            },
            Some(episode) if note.note_date < episode.entry_date => {
                fail(Entity::Note, row, "note_date precedes its episode".to_string());
            },
            Some(_) => {},
            None => fail(Entity::Note, row, format!("unknown episode_id {}", note.episode_id)),
        }
        if let Some(case_id) = note.case_id {
            let linked = cases_of_child
                .get(&note.child_id)
                .is_some_and(|cases| cases.contains(&case_id));
            if !linked {
                fail(Entity::Note, row, format!("case {} is not one of the child's cases", case_id));
            }
        }
    }

    violations
}
