//! Synthetic dataset generation
//!
//! Tables are generated parents first; every child row draws its keys from
//! rows that already exist, so the dataset is referentially complete.

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::{index, IndexedRandom};
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::error::Result;
use crate::model::{
    AllegationRow, CaseChildRow, CaseRow, ChildRow, Dataset, EpisodeRow, NoteRow, PlacementRow,
};

// ============================================================================
// Categorical Distributions
// ============================================================================

const COUNTIES: &[(&str, f64)] = &[
    ("Cook", 0.40),
    ("DuPage", 0.20),
    ("Lake", 0.15),
    ("Will", 0.15),
    ("Kane", 0.10),
];
const COUNTY_NAMES: &[&str] = &["Cook", "DuPage", "Lake", "Will", "Kane"];
const GENDERS: &[(&str, f64)] = &[("Male", 0.51), ("Female", 0.49)];
const RACES: &[(&str, f64)] = &[
    ("Black", 0.35),
    ("White", 0.30),
    ("Hispanic", 0.25),
    ("Asian", 0.05),
    ("Other", 0.05),
];
const ETHNICITIES: &[(&str, f64)] = &[("Hispanic", 0.25), ("Non-Hispanic", 0.75)];
const CASE_TYPES: &[(&str, f64)] = &[
    ("investigation", 0.50),
    ("assessment", 0.30),
    ("services", 0.20),
];
const FINDINGS: &[(&str, f64)] = &[("indicated", 0.30), ("unfounded", 0.50), ("pending", 0.20)];

const OPEN_CASE_PROBABILITY: f64 = 0.30;
const ACTIVE_EPISODE_PROBABILITY: f64 = 0.70;

const ROLES: &[&str] = &["victim", "sibling", "witness"];
const REMOVAL_REASONS: &[&str] = &[
    "neglect",
    "physical_abuse",
    "sexual_abuse",
    "parental_substance_abuse",
    "domestic_violence",
    "abandonment",
];
const GOALS: &[&str] = &[
    "reunification",
    "adoption",
    "guardianship",
    "independent_living",
    "relative_placement",
];
const PLACEMENT_TYPES: &[&str] = &[
    "foster_home",
    "kinship",
    "group_home",
    "residential",
    "therapeutic_foster_care",
    "independent_living",
];
const ALLEGATION_TYPES: &[&str] = &[
    "neglect",
    "physical_abuse",
    "sexual_abuse",
    "emotional_abuse",
    "medical_neglect",
    "educational_neglect",
];
const NOTE_TYPES: &[&str] = &["visit", "assessment", "court", "service", "review"];
const NOTE_TEMPLATES: &[&str] = &[
    "Initial assessment completed.",
    "Monthly visit conducted.",
    "Court hearing scheduled.",
    "Parent-child visit supervised.",
    "Therapeutic services initiated.",
    "Safety concerns noted.",
    "Child expressed desire to maintain contact with siblings.",
    "Educational needs assessment.",
    "Medical examination completed.",
    "Case review meeting held.",
];
const AUTHORS: &[&str] = &["J. Smith", "M. Johnson", "A. Williams", "K. Brown", "R. Davis"];

fn weighted<R: Rng + ?Sized>(rng: &mut R, choices: &[(&'static str, f64)]) -> &'static str {
    let total: f64 = choices.iter().map(|(_, w)| w).sum();
    let mut target = rng.random::<f64>() * total;
    for (value, weight) in choices {
        if target < *weight {
            return *value;
        }
        target -= weight;
    }
    choices.last().map(|(v, _)| *v).unwrap_or_default()
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, choices: &[&'static str]) -> &'static str {
    choices.choose(rng).copied().unwrap_or_default()
}

fn days_before<R: Rng + ?Sized>(rng: &mut R, date: NaiveDate, min: i64, max: i64) -> NaiveDate {
    date - Duration::days(rng.random_range(min..=max))
}

fn days_after<R: Rng + ?Sized>(rng: &mut R, date: NaiveDate, min: i64, max: i64) -> NaiveDate {
    date + Duration::days(rng.random_range(min..=max))
}

/// Seeded generator of one [`Dataset`]
pub struct Generator {
    config: GeneratorConfig,
    rng: StdRng,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self { config, rng })
    }

    /// Generate all seven tables
    pub fn generate(mut self) -> Dataset {
        info!(
            seed = self.config.seed,
            reference_date = %self.config.reference_date,
            "Generating sample data"
        );

        let mut dataset = Dataset {
            children: self.children(),
            ..Dataset::default()
        };
        dataset.cases = self.cases();
        dataset.case_child = self.case_child();
        dataset.episodes = self.episodes(&dataset.children);
        dataset.placements = self.placements(&dataset.episodes);
        dataset.allegations = self.allegations(&dataset.case_child, &dataset.cases);
        dataset.notes = self.notes(&dataset.episodes, &dataset.case_child);

        for (entity, rows) in dataset.counts() {
            debug!(entity = %entity, rows, "Generated");
        }
        dataset
    }

    fn children(&mut self) -> Vec<ChildRow> {
        let reference = self.config.reference_date;
        (1..=self.config.children as i64)
            .map(|child_id| ChildRow {
                child_id,
                date_of_birth: days_before(&mut self.rng, reference, 365, 365 * 18),
                gender: weighted(&mut self.rng, GENDERS),
                race: weighted(&mut self.rng, RACES),
                ethnicity: weighted(&mut self.rng, ETHNICITIES),
                initial_county: weighted(&mut self.rng, COUNTIES),
            })
            .collect()
    }

    fn cases(&mut self) -> Vec<CaseRow> {
        let reference = self.config.reference_date;
        (1..=self.config.cases as i64)
            .map(|case_id| {
                let referral_date = days_before(&mut self.rng, reference, 30, 1095);
                let case_type = weighted(&mut self.rng, CASE_TYPES);
                let intake_county = weighted(&mut self.rng, COUNTIES);
                let closed = !self.rng.random_bool(OPEN_CASE_PROBABILITY);
                CaseRow {
                    case_id,
                    case_number: format!("CASE-{:06}", case_id),
                    referral_date,
                    case_type,
                    intake_county,
                    case_status: if closed { "closed" } else { "open" },
                    closure_date: closed.then(|| days_after(&mut self.rng, referral_date, 30, 365)),
                }
            })
            .collect()
    }

    fn case_child(&mut self) -> Vec<CaseChildRow> {
        let children = self.config.children;
        let mut links = Vec::new();
        for case_id in 1..=self.config.cases as i64 {
            let in_case = self.rng.random_range(1..=3.min(children));
            for picked in index::sample(&mut self.rng, children, in_case) {
                links.push(CaseChildRow {
                    case_id,
                    child_id: picked as i64 + 1,
                    role_in_case: uniform(&mut self.rng, ROLES),
                });
            }
        }
        links
    }

    fn episodes(&mut self, children: &[ChildRow]) -> Vec<EpisodeRow> {
        let reference = self.config.reference_date;
        let mut episodes = Vec::with_capacity(self.config.episodes);

        for episode_id in 1..=self.config.episodes as i64 {
            let child = &children[self.rng.random_range(0..children.len())];
            let entry_date = days_before(&mut self.rng, reference, 30, 1460);
            let active = self.rng.random_bool(ACTIVE_EPISODE_PROBABILITY);
            let exit_date = (!active).then(|| days_after(&mut self.rng, entry_date, 30, 1095));

            episodes.push(EpisodeRow {
                episode_id,
                child_id: child.child_id,
                entry_date,
                exit_date,
                removal_reason: uniform(&mut self.rng, REMOVAL_REASONS),
                entry_age_days: (entry_date - child.date_of_birth).num_days(),
                episode_status: if active { "active" } else { "closed" },
                goal: uniform(&mut self.rng, GOALS),
            });
        }
        episodes
    }

    fn placements(&mut self, episodes: &[EpisodeRow]) -> Vec<PlacementRow> {
        let mut placements = Vec::new();
        let mut placement_id = 0;

        for episode in episodes {
            let count = self.rng.random_range(1..=5);
            let episode_end = episode.exit_date.unwrap_or(self.config.reference_date);
            let mut start = episode.entry_date;

            for i in 0..count {
                let placement_end = if i == count - 1 {
                    episode.exit_date
                } else {
                    Some(days_after(&mut self.rng, start, 30, 365).min(episode_end))
                };

                placement_id += 1;
                placements.push(PlacementRow {
                    placement_id,
                    episode_id: episode.episode_id,
                    placement_start: start,
                    placement_end,
                    placement_type: uniform(&mut self.rng, PLACEMENT_TYPES),
                    placement_county: uniform(&mut self.rng, COUNTY_NAMES),
                    provider_id: format!("PROV-{}", self.rng.random_range(1000..=9999)),
                });

                if let Some(end) = placement_end {
                    start = end;
                }
            }
        }
        placements
    }

    fn allegations(&mut self, links: &[CaseChildRow], cases: &[CaseRow]) -> Vec<AllegationRow> {
        let mut allegations = Vec::new();
        for link in links {
            let referral = cases
                .iter()
                .find(|c| c.case_id == link.case_id)
                .map(|c| c.referral_date)
                .unwrap_or(self.config.reference_date);

            for _ in 0..self.rng.random_range(1..=2) {
                allegations.push(AllegationRow {
                    case_id: link.case_id,
                    child_id: link.child_id,
                    allegation_type: uniform(&mut self.rng, ALLEGATION_TYPES),
                    allegation_date: referral,
                    finding: weighted(&mut self.rng, FINDINGS),
                });
            }
        }
        allegations
    }

    fn notes(&mut self, episodes: &[EpisodeRow], links: &[CaseChildRow]) -> Vec<NoteRow> {
        let mut cases_of_child: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for link in links {
            cases_of_child.entry(link.child_id).or_default().push(link.case_id);
        }

        let mut notes = Vec::new();
        for episode in episodes {
            let end = episode.exit_date.unwrap_or(self.config.reference_date);
            let span = (end - episode.entry_date).num_days().max(0);
            let child_cases = cases_of_child
                .get(&episode.child_id)
                .map(Vec::as_slice)
                .unwrap_or_default();

            for _ in 0..self.rng.random_range(3..=10) {
                let note_date = episode.entry_date + Duration::days(self.rng.random_range(0..=span));
                notes.push(NoteRow {
                    case_id: child_cases.choose(&mut self.rng).copied(),
                    child_id: episode.child_id,
                    episode_id: episode.episode_id,
                    note_date,
                    note_type: uniform(&mut self.rng, NOTE_TYPES),
                    note_text: uniform(&mut self.rng, NOTE_TEMPLATES),
                    author: uniform(&mut self.rng, AUTHORS),
                });
            }
        }
        notes
    }
}

/// Generate a dataset from `config`
pub fn generate(config: GeneratorConfig) -> Result<Dataset> {
    Ok(Generator::new(config)?.generate())
}
