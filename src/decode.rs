//! Row decoding: header lookup, defaults and type coercion.
//!
//! Decoding is pure. A failed row comes back as a [`RowError`] value; the
//! listener turns it into a rejected row and keeps reading.

use std::collections::HashMap;
use thiserror::Error;

use crate::field::{FieldKind, FieldRegistry};

/// Why a data row was rejected. The `Display` form is the reason column of
/// the rejected-row export.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("missing column '{column}'")]
    MissingColumn { column: String },
    #[error("row {row}: missing value for '{column}'")]
    MissingValue { column: String, row: u64 },
    #[error("row {row}: '{raw}' in column '{column}' is not a valid {expected}")]
    TypeMismatch {
        column: String,
        row: u64,
        raw: String,
        expected: FieldKind,
    },
    #[error("row {row}: value in column '{column}' failed validation")]
    FieldRejected { column: String, row: u64 },
    #[error("row {row}: record failed validation")]
    RecordRejected { row: u64 },
    #[error("row {row}: exceeds the limit of {max} rows")]
    LimitExceeded { row: u64, max: u64 },
}

/// Column header → cell position, built from the header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderIndex {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    /// Headers are trimmed; when a header repeats in the sheet the leftmost
    /// column wins.
    pub fn from_row(cells: &[String]) -> Self {
        let names: Vec<String> = cells.iter().map(|c| c.trim().to_string()).collect();
        let mut positions = HashMap::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            if !name.is_empty() {
                positions.entry(name.clone()).or_insert(idx);
            }
        }
        Self { names, positions }
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.positions.get(column).copied()
    }

    /// Header cells in sheet order, as read.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A populated record plus each slot's coerced text, in descriptor order.
/// `None` marks a slot that stayed unset.
#[derive(Debug)]
pub struct DecodedRow<T> {
    pub record: T,
    pub values: Vec<Option<String>>,
}

/// Decodes one data row. `row` is the 1-based data row index used in errors.
pub fn decode_row<T: Default>(
    fields: &FieldRegistry<T>,
    header: &HeaderIndex,
    cells: &[String],
    row: u64,
) -> Result<DecodedRow<T>, RowError> {
    let mut record = T::default();
    let mut values = Vec::with_capacity(fields.len());

    for field in fields.iter() {
        let column = field.column_header();

        let raw = match header.position(column) {
            Some(idx) => {
                let cell = cells.get(idx).map(|c| c.trim()).unwrap_or_default();
                if cell.is_empty() {
                    match field.default() {
                        Some(default) => Some(default),
                        None if field.is_required() => {
                            return Err(RowError::MissingValue {
                                column: column.to_string(),
                                row,
                            });
                        }
                        None => None,
                    }
                } else {
                    Some(cell)
                }
            }
            None if field.is_required() => {
                return Err(RowError::MissingColumn {
                    column: column.to_string(),
                });
            }
            None => field.default(),
        };

        let Some(raw) = raw else {
            values.push(None);
            continue;
        };

        match field.assign(&mut record, raw) {
            Some(coerced) => values.push(Some(coerced)),
            None => {
                return Err(RowError::TypeMismatch {
                    column: column.to_string(),
                    row,
                    raw: raw.to_string(),
                    expected: field.kind(),
                });
            }
        }
    }

    Ok(DecodedRow { record, values })
}
