//! Two-stage validation of decoded rows.
//!
//! Stage A runs each descriptor's validator in declaration order and stops at
//! the first failure. Stage B hands the whole record to the caller's
//! `check_record` hook, and only runs when stage A passed.

use crate::decode::{DecodedRow, RowError};
use crate::field::FieldRegistry;

/// Stage A. Slots that stayed unset are checked as the empty string.
pub fn validate_fields<T>(
    fields: &FieldRegistry<T>,
    decoded: &DecodedRow<T>,
    row: u64,
) -> Result<(), RowError> {
    for (field, value) in fields.iter().zip(&decoded.values) {
        if !field.has_validator() {
            continue;
        }
        if !field.check(value.as_deref().unwrap_or_default()) {
            return Err(RowError::FieldRejected {
                column: field.column_header().to_string(),
                row,
            });
        }
    }
    Ok(())
}

/// Stage B.
pub fn check_record<T, F>(check: Option<&F>, record: &T, row: u64) -> Result<(), RowError>
where
    F: Fn(&T) -> bool + ?Sized,
{
    match check {
        Some(check) if !check(record) => Err(RowError::RecordRejected { row }),
        _ => Ok(()),
    }
}
