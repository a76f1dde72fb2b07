//! In-memory tabular batches read from CSV
//!
//! A `Batch` is columnar and typed the way a dataframe reader would type it:
//! a column whose cells all parse as integers is `Integer`, a numeric column
//! that has missing cells or fractional values is `Float`, anything else is
//! `Text`. Missing cells are `None`. Columns read from rows also keep their
//! source text, so a column the schema declares as text is never retyped.
//! Turning this into transfer-ready text is the normalizer's job.

use std::io::Read;
use std::path::Path;

/// Values of one column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Integer(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Integer(v) => v.len(),
            ColumnValues::Float(v) => v.len(),
            ColumnValues::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn null_count(&self) -> usize {
        match self {
            ColumnValues::Integer(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnValues::Float(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnValues::Text(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    /// Infer the column type from raw cells.
    fn infer(cells: Vec<Option<String>>) -> Self {
        let present = || cells.iter().flatten();

        if present().next().is_some() {
            let has_missing = cells.iter().any(Option::is_none);
            if !has_missing && present().all(|s| s.trim().parse::<i64>().is_ok()) {
                return ColumnValues::Integer(
                    cells
                        .iter()
                        .map(|c| c.as_deref().and_then(|s| s.trim().parse().ok()))
                        .collect(),
                );
            }
            if present().all(|s| is_float(s)) {
                return ColumnValues::Float(
                    cells
                        .iter()
                        .map(|c| c.as_deref().and_then(|s| s.trim().parse().ok()))
                        .collect(),
                );
            }
        }

        ColumnValues::Text(cells)
    }
}

fn is_float(s: &str) -> bool {
    s.trim().parse::<f64>().is_ok_and(f64::is_finite)
}

/// For one raw comma-separated record, whether each field opens with a quote.
fn quoted_fields(raw: &[u8]) -> Vec<bool> {
    let mut flags = Vec::new();
    let mut at_start = true;
    let mut in_quotes = false;
    let mut bytes = raw.iter().peekable();

    while let Some(&b) = bytes.next() {
        if at_start {
            at_start = false;
            flags.push(b == b'"');
            if b == b'"' {
                in_quotes = true;
                continue;
            }
        }
        if in_quotes {
            if b == b'"' {
                if bytes.peek() == Some(&&b'"') {
                    bytes.next();
                } else {
                    in_quotes = false;
                }
            }
            continue;
        }
        match b {
            b',' => at_start = true,
            b'\n' | b'\r' => break,
            _ => {},
        }
    }
    if at_start {
        flags.push(false);
    }
    flags
}

/// A named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
    source_text: Option<Vec<Option<String>>>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: ColumnValues) -> Self {
        Self {
            name: name.into(),
            values,
            source_text: None,
        }
    }

    /// Column inferred from raw cells, keeping the cells as read
    pub fn from_text(name: impl Into<String>, cells: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            values: ColumnValues::infer(cells.clone()),
            source_text: Some(cells),
        }
    }

    /// Cells as text: the source text when the column was read from rows,
    /// otherwise the typed values formatted back.
    pub fn text_cells(&self) -> Vec<Option<String>> {
        if let Some(cells) = &self.source_text {
            return cells.clone();
        }
        match &self.values {
            ColumnValues::Integer(v) => v.iter().map(|x| x.map(|i| i.to_string())).collect(),
            ColumnValues::Float(v) => v.iter().map(|x| x.map(|f| f.to_string())).collect(),
            ColumnValues::Text(v) => v.clone(),
        }
    }
}

/// Columnar batch with equal-length columns
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    columns: Vec<Column>,
    rows: usize,
}

impl Batch {
    /// Build from typed columns. Returns `None` if the columns differ in length.
    pub fn from_columns(columns: Vec<Column>) -> Option<Self> {
        let rows = columns.first().map(|c| c.values.len()).unwrap_or(0);
        if columns.iter().any(|c| c.values.len() != rows) {
            return None;
        }
        Some(Self { columns, rows })
    }

    /// Build from row-major raw cells, inferring column types.
    ///
    /// Rows shorter than the header are padded with missing cells, longer rows
    /// are truncated; CSV input never reaches this with ragged rows.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let row_count = rows.len();
        let mut cells: Vec<Vec<Option<String>>> = headers
            .iter()
            .map(|_| Vec::with_capacity(row_count))
            .collect();

        for row in rows {
            let mut row = row.into_iter();
            for column in cells.iter_mut() {
                column.push(row.next().flatten());
            }
        }

        let columns = headers
            .into_iter()
            .zip(cells)
            .map(|(name, cells)| Column::from_text(name, cells))
            .collect();

        Self {
            columns,
            rows: row_count,
        }
    }

    /// Read a CSV file with a header line. Unquoted cells equal to one of
    /// `null_markers` are missing; a quoted cell is always a value.
    pub fn read_csv(path: impl AsRef<Path>, null_markers: &[String]) -> csv::Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_csv_bytes(&data, null_markers)
    }

    /// Same as [`Batch::read_csv`] over any reader
    pub fn from_reader<R: Read>(mut reader: R, null_markers: &[String]) -> csv::Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_csv_bytes(&data, null_markers)
    }

    fn from_csv_bytes(data: &[u8], null_markers: &[String]) -> csv::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(data);
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut records = Vec::new();
        let mut record = csv::StringRecord::new();
        while reader.read_record(&mut record)? {
            let start = record.position().map_or(0, |p| p.byte() as usize);
            records.push((start, record.clone()));
        }

        let mut rows = Vec::with_capacity(records.len());
        for (i, (start, record)) in records.iter().enumerate() {
            let end = records.get(i + 1).map_or(data.len(), |(next, _)| *next);
            let quoted = quoted_fields(data.get(*start..end).unwrap_or_default());
            rows.push(
                record
                    .iter()
                    .enumerate()
                    .map(|(j, cell)| {
                        let bare = !quoted.get(j).copied().unwrap_or(false);
                        if bare && null_markers.iter().any(|m| m == cell) {
                            None
                        } else {
                            Some(cell.to_string())
                        }
                    })
                    .collect(),
            );
        }

        Ok(Self::from_rows(headers, rows))
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        vec!["NULL".to_string(), String::new()]
    }

    #[test]
    fn test_integer_column_without_missing_cells() {
        let csv = "episode_id,child_id\n1,10\n2,11\n";
        let batch = Batch::from_reader(csv.as_bytes(), &markers()).unwrap();

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(
            batch.column("child_id").unwrap().values,
            ColumnValues::Integer(vec![Some(10), Some(11)])
        );
    }

    #[test]
    fn test_numeric_column_with_missing_cells_is_float() {
        let csv = "case_id,child_id\n3,1\nNULL,2\n";
        let batch = Batch::from_reader(csv.as_bytes(), &markers()).unwrap();

        assert_eq!(
            batch.column("case_id").unwrap().values,
            ColumnValues::Float(vec![Some(3.0), None])
        );
    }

    #[test]
    fn test_text_column_keeps_quoted_content() {
        let csv = "note_text,author\n\"Visit, then call\",J. Smith\n";
        let batch = Batch::from_reader(csv.as_bytes(), &markers()).unwrap();

        assert_eq!(
            batch.column("note_text").unwrap().values,
            ColumnValues::Text(vec![Some("Visit, then call".to_string())])
        );
    }

    #[test]
    fn test_quoted_marker_is_a_value() {
        let csv = "note_text,author\n\"NULL\",J. Smith\nNULL,\"\"\n";
        let batch = Batch::from_reader(csv.as_bytes(), &markers()).unwrap();

        assert_eq!(
            batch.column("note_text").unwrap().values,
            ColumnValues::Text(vec![Some("NULL".to_string()), None])
        );
        assert_eq!(
            batch.column("author").unwrap().values,
            ColumnValues::Text(vec![Some("J. Smith".to_string()), Some(String::new())])
        );
    }

    #[test]
    fn test_quoted_fields_tracks_each_field() {
        assert_eq!(quoted_fields(b"1,\"a,b\",NULL\n"), vec![false, true, false]);
        assert_eq!(quoted_fields(b"\"say \"\"hi\"\"\",,\r\n"), vec![true, false, false]);
        assert_eq!(quoted_fields(b"x,"), vec![false, false]);
    }

    #[test]
    fn test_source_text_survives_inference() {
        let csv = "provider_id,case_number\n0042,1.50\n0007,2.50\n";
        let batch = Batch::from_reader(csv.as_bytes(), &markers()).unwrap();

        let provider = batch.column("provider_id").unwrap();
        assert_eq!(provider.values, ColumnValues::Integer(vec![Some(42), Some(7)]));
        assert_eq!(
            provider.text_cells(),
            vec![Some("0042".to_string()), Some("0007".to_string())]
        );
        assert_eq!(
            batch.column("case_number").unwrap().text_cells(),
            vec![Some("1.50".to_string()), Some("2.50".to_string())]
        );
    }

    #[test]
    fn test_all_missing_column_is_text() {
        let csv = "closure_date\nNULL\nNULL\n";
        let batch = Batch::from_reader(csv.as_bytes(), &markers()).unwrap();
        let column = batch.column("closure_date").unwrap();
        assert_eq!(column.values.null_count(), column.values.len());
    }

    #[test]
    fn test_ragged_csv_is_an_error() {
        let csv = "a,b\n1,2\n3\n";
        assert!(Batch::from_reader(csv.as_bytes(), &markers()).is_err());
    }

    #[test]
    fn test_from_columns_rejects_unequal_lengths() {
        let columns = vec![
            Column::new("a", ColumnValues::Integer(vec![Some(1)])),
            Column::new("b", ColumnValues::Integer(vec![])),
        ];
        assert!(Batch::from_columns(columns).is_none());
    }
}
