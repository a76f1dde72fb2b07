//! Bulk transfer encoding
//!
//! Serializes normalized batches into the text stream consumed by
//! `COPY <table> (<columns>) FROM STDIN WITH (FORMAT csv, ...)`, and parses
//! such streams back. The encoder and the COPY statement are built from the
//! same [`TransferFormat`], so they always agree on the delimiter, the null
//! sentinel, and the quoting rules:
//!
//! - no header, one record per `\n`-terminated line;
//! - a missing value is the bare sentinel token;
//! - a value is wrapped in `"` (with inner `"` doubled) when it contains the
//!   delimiter, a quote, `\n` or `\r`, when it equals the sentinel, when it is
//!   empty or has surrounding whitespace, and when it is the `\.` end marker.
//!
//! A bare sentinel decodes to `None`; a quoted one decodes to the text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::{Field, NormalizedBatch};

/// Default field delimiter
pub const DEFAULT_DELIMITER: char = ',';

/// Default null sentinel
pub const DEFAULT_NULL_SENTINEL: &str = "NULL";

const QUOTE: char = '"';
const END_OF_DATA: &str = "\\.";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Column '{0}' is not present in the batch")]
    UnknownColumn(String),

    #[error("Invalid transfer format: {0}")]
    InvalidFormat(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Transfer stream is not valid UTF-8")]
    Utf8,

    #[error("Line {line}: unterminated quoted field")]
    UnterminatedQuote { line: usize },

    #[error("Line {line}: unexpected character after closing quote")]
    TrailingAfterQuote { line: usize },

    #[error("Line {line}: quote inside an unquoted field")]
    StrayQuote { line: usize },
}

/// Delimiter, sentinel and quoting shared by the encoder and the COPY command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFormat {
    pub delimiter: char,
    pub null_sentinel: String,
}

impl Default for TransferFormat {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            null_sentinel: DEFAULT_NULL_SENTINEL.to_string(),
        }
    }
}

/// An encoded batch, ready for the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    pub columns: Vec<String>,
    pub rows: usize,
    pub payload: Vec<u8>,
}

impl TransferFormat {
    pub fn new(delimiter: char, null_sentinel: impl Into<String>) -> Result<Self, EncodeError> {
        let format = Self {
            delimiter,
            null_sentinel: null_sentinel.into(),
        };
        format.validate()?;
        Ok(format)
    }

    pub fn validate(&self) -> Result<(), EncodeError> {
        if !self.delimiter.is_ascii() || matches!(self.delimiter, QUOTE | '\n' | '\r' | '\\') {
            return Err(EncodeError::InvalidFormat(format!(
                "delimiter {:?} must be a single ASCII character other than quote, backslash or newline",
                self.delimiter
            )));
        }

        let sentinel = &self.null_sentinel;
        if sentinel.is_empty()
            || sentinel.contains(self.delimiter)
            || sentinel.contains(QUOTE)
            || sentinel.contains(['\n', '\r'])
        {
            return Err(EncodeError::InvalidFormat(format!(
                "null sentinel {:?} must be non-empty and free of the delimiter, quotes and newlines",
                sentinel
            )));
        }

        Ok(())
    }

    /// Options clause of the COPY command
    pub fn copy_options(&self) -> String {
        format!(
            "FORMAT csv, DELIMITER {}, NULL {}, QUOTE {}",
            quote_literal(&self.delimiter.to_string()),
            quote_literal(&self.null_sentinel),
            quote_literal(&QUOTE.to_string()),
        )
    }

    /// Full COPY command for `table` and `columns`
    pub fn copy_statement(&self, table: &str, columns: &[String]) -> String {
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "COPY {} ({}) FROM STDIN WITH ({})",
            quote_ident(table),
            column_list,
            self.copy_options()
        )
    }

    /// Whether `value` must be quoted to survive the trip unchanged
    pub fn needs_quoting(&self, value: &str) -> bool {
        value.is_empty()
            || value == self.null_sentinel
            || value == END_OF_DATA
            || value.contains([self.delimiter, QUOTE, '\n', '\r'])
            || value.starts_with(char::is_whitespace)
            || value.ends_with(char::is_whitespace)
    }

    /// Append one field to `out`
    pub fn write_field(&self, out: &mut String, field: &Field) {
        match field {
            Field::Null => out.push_str(&self.null_sentinel),
            Field::Value(value) if self.needs_quoting(value) => {
                out.push(QUOTE);
                for ch in value.chars() {
                    if ch == QUOTE {
                        out.push(QUOTE);
                    }
                    out.push(ch);
                }
                out.push(QUOTE);
            },
            Field::Value(value) => out.push_str(value),
        }
    }

    /// Encode the `columns` of `batch`, in the given order.
    ///
    /// Deterministic: the same batch and column list always yield the same bytes.
    pub fn encode(
        &self,
        batch: &NormalizedBatch,
        columns: &[String],
    ) -> Result<EncodedBatch, EncodeError> {
        let indices = columns
            .iter()
            .map(|c| {
                batch
                    .column_index(c)
                    .ok_or_else(|| EncodeError::UnknownColumn(c.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = String::new();
        for row in batch.rows() {
            for (position, &index) in indices.iter().enumerate() {
                if position > 0 {
                    out.push(self.delimiter);
                }
                self.write_field(&mut out, &row[index]);
            }
            out.push('\n');
        }

        Ok(EncodedBatch {
            columns: columns.to_vec(),
            rows: batch.num_rows(),
            payload: out.into_bytes(),
        })
    }

    /// Parse a transfer stream back into rows; `None` is a missing value.
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<Vec<Option<String>>>, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::Utf8)?;
        let mut rows = Vec::new();
        let mut row: Vec<Option<String>> = Vec::new();
        let mut field = String::new();
        let mut quoted = false;
        let mut state = State::FieldStart;
        let mut line = 1;
        let mut chars = text.chars().peekable();

        while let Some(ch) = chars.next() {
            match state {
                State::FieldStart | State::Unquoted => {
                    if ch == self.delimiter {
                        row.push(self.finish_field(&mut field, quoted));
                        quoted = false;
                        state = State::FieldStart;
                    } else if ch == '\n' || ch == '\r' {
                        if ch == '\r' && chars.peek() == Some(&'\n') {
                            chars.next();
                        }
                        row.push(self.finish_field(&mut field, quoted));
                        rows.push(std::mem::take(&mut row));
                        quoted = false;
                        state = State::FieldStart;
                        line += 1;
                    } else if ch == QUOTE {
                        if state == State::Unquoted {
                            return Err(DecodeError::StrayQuote { line });
                        }
                        quoted = true;
                        state = State::Quoted;
                    } else {
                        field.push(ch);
                        state = State::Unquoted;
                    }
                },
                State::Quoted => {
                    if ch == QUOTE {
                        if chars.peek() == Some(&QUOTE) {
                            chars.next();
                            field.push(QUOTE);
                        } else {
                            state = State::AfterQuote;
                        }
                    } else {
                        if ch == '\n' {
                            line += 1;
                        }
                        field.push(ch);
                    }
                },
                State::AfterQuote => {
                    if ch == self.delimiter {
                        row.push(self.finish_field(&mut field, quoted));
                        quoted = false;
                        state = State::FieldStart;
                    } else if ch == '\n' || ch == '\r' {
                        if ch == '\r' && chars.peek() == Some(&'\n') {
                            chars.next();
                        }
                        row.push(self.finish_field(&mut field, quoted));
                        rows.push(std::mem::take(&mut row));
                        quoted = false;
                        state = State::FieldStart;
                        line += 1;
                    } else {
                        return Err(DecodeError::TrailingAfterQuote { line });
                    }
                },
            }
        }

        match state {
            State::Quoted => return Err(DecodeError::UnterminatedQuote { line }),
            // Last line without a trailing newline
            State::Unquoted | State::AfterQuote => {
                row.push(self.finish_field(&mut field, quoted));
                rows.push(row);
            },
            State::FieldStart if !row.is_empty() => {
                row.push(self.finish_field(&mut field, quoted));
                rows.push(row);
            },
            State::FieldStart => {},
        }

        Ok(rows)
    }

    fn finish_field(&self, field: &mut String, quoted: bool) -> Option<String> {
        let value = std::mem::take(field);
        if !quoted && value == self.null_sentinel {
            None
        } else {
            Some(value)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FieldStart,
    Unquoted,
    Quoted,
    AfterQuote,
}

/// Double-quote an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote an SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
