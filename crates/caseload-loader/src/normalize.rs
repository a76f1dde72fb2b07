//! Null and type normalization
//!
//! Turns a typed [`Batch`] into rows of [`Field`]s whose text is exactly what
//! goes on the wire:
//!
//! - a key or integer column typed `Float` holding only whole numbers (or
//!   nothing) becomes a nullable integer column, so `3.0` is sent as `3`;
//! - a `Float` column mixing whole and fractional values stays decimal;
//! - a column declared as text is sent exactly as read;
//! - date columns are parsed against a list of accepted formats and rendered
//!   as `YYYY-MM-DD`; a date that matches no format is coerced to null;
//! - every missing cell becomes [`Field::Null`], which the encoder renders as
//!   the configured null sentinel.
//!
//! Text that happens to spell the sentinel stays a [`Field::Value`]; telling
//! the two apart on the wire is the encoder's quoting.

use caseload_common::{ColumnKind, EntityDescriptor};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::batch::{Batch, Column, ColumnValues};

/// Formats accepted for date columns, tried in order.
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y",
    "%Y/%m/%d",
];

const ISO_DATE: &str = "%Y-%m-%d";

/// One normalized cell
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Null,
    Value(String),
}

impl Field {
    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Field::Null => None,
            Field::Value(v) => Some(v),
        }
    }

    /// Textual form with `sentinel` standing in for a missing value
    pub fn render<'a>(&'a self, sentinel: &'a str) -> &'a str {
        self.as_deref().unwrap_or(sentinel)
    }
}

impl From<Option<String>> for Field {
    fn from(value: Option<String>) -> Self {
        value.map(Field::Value).unwrap_or(Field::Null)
    }
}

/// What normalization changed, for logging and the load report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeStats {
    /// Float columns turned into nullable integers
    pub retyped_columns: Vec<String>,
    /// Float columns left decimal because a value had a fractional part
    pub decimal_columns: Vec<String>,
    /// Date columns with the number of unparseable values coerced to null
    pub coerced_dates: Vec<(String, usize)>,
    pub null_cells: usize,
}

/// Normalized, row-major batch
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedBatch {
    columns: Vec<String>,
    rows: Vec<Vec<Field>>,
    pub stats: NormalizeStats,
}

impl NormalizedBatch {
    /// Build directly from rows. Every row must have one field per column.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Field>>) -> Self {
        Self {
            columns,
            rows,
            stats: NormalizeStats::default(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Field>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Rendered text of every cell, sentinel for missing ones
    pub fn rendered(&self, sentinel: &str) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|f| f.render(sentinel).to_string()).collect())
            .collect()
    }
}

/// Retype a float column to nullable integers when that loses nothing.
///
/// Returns `None` as soon as one value is fractional, non-finite, or out of
/// `i64` range.
pub fn integer_lossless(values: &[Option<f64>]) -> Option<Vec<Option<i64>>> {
    const LIMIT: f64 = 9_007_199_254_740_992.0; // 2^53, exact in f64

    values
        .iter()
        .map(|value| match value {
            None => Some(None),
            Some(v) if v.is_finite() && v.fract() == 0.0 && v.abs() <= LIMIT => {
                Some(Some(*v as i64))
            },
            Some(_) => None,
        })
        .collect()
}

/// Batch normalizer
#[derive(Debug, Clone)]
pub struct Normalizer {
    date_formats: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMATS.iter().map(|f| f.to_string()).collect())
    }
}

impl Normalizer {
    pub fn new(date_formats: Vec<String>) -> Self {
        Self { date_formats }
    }

    /// Normalize `batch` against the entity's declared column kinds.
    pub fn normalize(&self, batch: &Batch, descriptor: &EntityDescriptor) -> NormalizedBatch {
        self.normalize_with(batch, |name| descriptor.column(name).map(|c| c.kind))
    }

    /// Normalize with an explicit kind lookup. Columns the lookup does not
    /// know are typed by inference alone.
    pub fn normalize_with<F>(&self, batch: &Batch, kind_of: F) -> NormalizedBatch
    where
        F: Fn(&str) -> Option<ColumnKind>,
    {
        let mut stats = NormalizeStats::default();
        let mut rendered: Vec<Vec<Field>> = Vec::with_capacity(batch.columns().len());

        for column in batch.columns() {
            let kind = kind_of(&column.name);
            let mut fields = match kind {
                Some(ColumnKind::Text | ColumnKind::Date) => {
                    column.text_cells().into_iter().map(Field::from).collect()
                },
                _ => inferred_fields(column, &mut stats),
            };

            if kind == Some(ColumnKind::Date) {
                let coerced = self.normalize_dates(&mut fields);
                if coerced > 0 {
                    warn!(
                        column = %column.name,
                        coerced,
                        "Unparseable dates coerced to null"
                    );
                    stats.coerced_dates.push((column.name.clone(), coerced));
                }
            }

            stats.null_cells += fields.iter().filter(|f| f.is_null()).count();
            rendered.push(fields);
        }

        NormalizedBatch {
            columns: batch.column_names(),
            rows: transpose(rendered, batch.num_rows()),
            stats,
        }
    }

    /// Parse a single date with the configured formats
    pub fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();
        self.date_formats.iter().find_map(|format| {
            NaiveDate::parse_from_str(raw, format)
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(raw, format)
                        .ok()
                        .map(|dt| dt.date())
                })
        })
    }

    fn normalize_dates(&self, fields: &mut [Field]) -> usize {
        let mut coerced = 0;
        for field in fields.iter_mut() {
            if let Field::Value(raw) = field {
                *field = match self.parse_date(raw) {
                    Some(date) => Field::Value(date.format(ISO_DATE).to_string()),
                    None => {
                        coerced += 1;
                        Field::Null
                    },
                };
            }
        }
        coerced
    }
}

/// Fields of a key, integer or undeclared column, from its inferred type
fn inferred_fields(column: &Column, stats: &mut NormalizeStats) -> Vec<Field> {
    match &column.values {
        ColumnValues::Integer(values) => render_integers(values),
        ColumnValues::Float(values) => match integer_lossless(values) {
            Some(integers) => {
                debug!(column = %column.name, "Retyped whole-number column to integer");
                stats.retyped_columns.push(column.name.clone());
                render_integers(&integers)
            },
            None => {
                debug!(column = %column.name, "Column keeps decimal values");
                stats.decimal_columns.push(column.name.clone());
                values
                    .iter()
                    .map(|v| Field::from(v.map(|f| f.to_string())))
                    .collect()
            },
        },
        ColumnValues::Text(values) => values.iter().cloned().map(Field::from).collect(),
    }
}

fn render_integers(values: &[Option<i64>]) -> Vec<Field> {
    values
        .iter()
        .map(|v| Field::from(v.map(|i| i.to_string())))
        .collect()
}

fn transpose(columns: Vec<Vec<Field>>, rows: usize) -> Vec<Vec<Field>> {
    let mut out: Vec<Vec<Field>> = (0..rows)
        .map(|_| Vec::with_capacity(columns.len()))
        .collect();
    for column in columns {
        for (row, field) in out.iter_mut().zip(column) {
            row.push(field);
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use caseload_common::Entity;
    use proptest::prelude::*;

    fn float_batch(name: &str, values: Vec<Option<f64>>) -> Batch {
        Batch::from_columns(vec![Column::new(name, ColumnValues::Float(values))]).unwrap()
    }

    #[test]
    fn test_whole_floats_become_integers() {
        let batch = float_batch("case_id", vec![Some(3.0), None, Some(12.0)]);
        let normalized = Normalizer::default().normalize_with(&batch, |_| None);

        assert_eq!(
            normalized.rendered("NULL"),
            vec![vec!["3"], vec!["NULL"], vec!["12"]]
        );
        assert_eq!(normalized.stats.retyped_columns, vec!["case_id"]);
        assert_eq!(normalized.stats.null_cells, 1);
    }

    #[test]
    fn test_fractional_column_stays_decimal() {
        let batch = float_batch("score", vec![Some(1.0), Some(2.5), None]);
        let normalized = Normalizer::default().normalize_with(&batch, |_| None);

        assert_eq!(
            normalized.rendered("NULL"),
            vec![vec!["1"], vec!["2.5"], vec!["NULL"]]
        );
        assert_eq!(normalized.stats.decimal_columns, vec!["score"]);
    }

    #[test]
    fn test_literal_sentinel_text_is_not_null() {
        let batch = Batch::from_columns(vec![Column::new(
            "note_text",
            ColumnValues::Text(vec![Some("NULL".to_string()), None]),
        )])
        .unwrap();
        let normalized = Normalizer::default().normalize_with(&batch, |_| None);

        assert_eq!(normalized.rows()[0][0], Field::Value("NULL".to_string()));
        assert_eq!(normalized.rows()[1][0], Field::Null);
    }

    #[test]
    fn test_dates_are_rendered_iso() {
        let batch = Batch::from_columns(vec![Column::new(
            "entry_date",
            ColumnValues::Text(vec![
                Some("2024-03-05".to_string()),
                Some("2024-03-05 00:00:00".to_string()),
                Some("03/05/2024".to_string()),
                Some("not a date".to_string()),
                None,
            ]),
        )])
        .unwrap();
        let normalized = Normalizer::default()
            .normalize_with(&batch, |name| (name == "entry_date").then_some(ColumnKind::Date));

        assert_eq!(
            normalized.rendered("NULL"),
            vec![
                vec!["2024-03-05"],
                vec!["2024-03-05"],
                vec!["2024-03-05"],
                vec!["NULL"],
                vec!["NULL"],
            ]
        );
        assert_eq!(
            normalized.stats.coerced_dates,
            vec![("entry_date".to_string(), 1)]
        );
    }

    #[test]
    fn test_declared_text_is_sent_as_read() {
        let csv = "provider_id,placement_type\n0042,Foster Home\n0007,Group Home\n";
        let batch = Batch::from_reader(csv.as_bytes(), &[]).unwrap();
        let normalized =
            Normalizer::default().normalize(&batch, Entity::Placement.descriptor());

        assert_eq!(
            normalized.rendered("NULL"),
            vec![vec!["0042", "Foster Home"], vec!["0007", "Group Home"]]
        );
        assert!(normalized.stats.retyped_columns.is_empty());
    }

    #[test]
    fn test_decimal_looking_text_keeps_its_digits() {
        let csv = "case_number\n1.50\n2.50\n";
        let batch = Batch::from_reader(csv.as_bytes(), &[]).unwrap();

        let declared = Normalizer::default().normalize(&batch, Entity::Case.descriptor());
        assert_eq!(declared.rendered("NULL"), vec![vec!["1.50"], vec!["2.50"]]);

        let inferred = Normalizer::default().normalize_with(&batch, |_| None);
        assert_eq!(inferred.rendered("NULL"), vec![vec!["1.5"], vec!["2.5"]]);
    }

    #[test]
    fn test_declared_foreign_key_is_retyped() {
        let csv = "case_id,child_id\n3,1\nNULL,2\n";
        let markers = vec!["NULL".to_string()];
        let batch = Batch::from_reader(csv.as_bytes(), &markers).unwrap();
        let normalized = Normalizer::default().normalize(&batch, Entity::Note.descriptor());

        assert_eq!(normalized.rendered("NULL"), vec![vec!["3", "1"], vec!["NULL", "2"]]);
        assert_eq!(normalized.stats.retyped_columns, vec!["case_id"]);
    }

    #[test]
    fn test_rows_keep_column_order() {
        let batch = Batch::from_columns(vec![
            Column::new("a", ColumnValues::Integer(vec![Some(1), Some(2)])),
            Column::new("b", ColumnValues::Text(vec![Some("x".into()), None])),
        ])
        .unwrap();
        let normalized = Normalizer::default().normalize_with(&batch, |_| None);

        assert_eq!(normalized.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(normalized.rendered("\\N"), vec![vec!["1", "x"], vec!["2", "\\N"]]);
    }

    proptest! {
        #[test]
        fn prop_whole_number_columns_have_no_fraction(
            values in prop::collection::vec(prop::option::of(-1_000_000i64..1_000_000), 1..50)
        ) {
            let floats: Vec<Option<f64>> = values.iter().map(|v| v.map(|i| i as f64)).collect();
            let normalized = Normalizer::default().normalize_with(&float_batch("id", floats), |_| None);

            for (row, original) in normalized.rows().iter().zip(&values) {
                match original {
                    Some(i) => prop_assert_eq!(&row[0], &Field::Value(i.to_string())),
                    None => prop_assert_eq!(&row[0], &Field::Null),
                }
            }
        }

        #[test]
        fn prop_every_missing_cell_renders_as_sentinel(
            cells in prop::collection::vec(prop::option::of("[a-z ]{0,8}"), 1..50)
        ) {
            let batch = Batch::from_columns(vec![Column::new(
                "text",
                ColumnValues::Text(cells.clone()),
            )])
            .unwrap();
            let rendered = Normalizer::default().normalize_with(&batch, |_| None).rendered("NULL");

            for (row, original) in rendered.iter().zip(&cells) {
                match original {
                    Some(text) => prop_assert_eq!(&row[0], text),
                    None => prop_assert_eq!(row[0].as_str(), "NULL"),
                }
            }
        }
    }
}
