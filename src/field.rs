//! Field descriptors: the per-column metadata a record type declares.
//!
//! A record type implements [`ImportRecord`] and lists its importable slots
//! once. The resulting [`FieldRegistry`] is built at controller construction
//! and only read afterwards; the row hot path never looks at the record type
//! again.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::{IngestError, IngestResult};

/// Declared type of a slot, reported in `TypeMismatch` reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Boolean,
    Decimal,
    Float,
    Date,
    DateTime,
    Text,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Decimal => "decimal",
            Self::Float => "float",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}

/// A slot type that can be coerced from a cell string.
///
/// `to_cell` renders the coerced value back to text; per-field validators see
/// this form rather than the raw cell.
pub trait FromCell: Sized {
    const KIND: FieldKind;

    fn from_cell(raw: &str) -> Option<Self>;

    fn to_cell(&self) -> String;
}

macro_rules! integer_cell {
    ($($t:ty),*) => {$(
        impl FromCell for $t {
            const KIND: FieldKind = FieldKind::Integer;

            fn from_cell(raw: &str) -> Option<Self> {
                let digits = raw.strip_prefix(['-', '+']).unwrap_or(raw);
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                raw.parse().ok()
            }

            fn to_cell(&self) -> String {
                self.to_string()
            }
        }
    )*};
}

integer_cell!(i32, i64, u32, u64, usize);

impl FromCell for bool {
    const KIND: FieldKind = FieldKind::Boolean;

    fn from_cell(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        }
    }

    fn to_cell(&self) -> String {
        self.to_string()
    }
}

impl FromCell for Decimal {
    const KIND: FieldKind = FieldKind::Decimal;

    fn from_cell(raw: &str) -> Option<Self> {
        Decimal::from_str(raw).ok()
    }

    fn to_cell(&self) -> String {
        self.to_string()
    }
}

impl FromCell for f64 {
    const KIND: FieldKind = FieldKind::Float;

    fn from_cell(raw: &str) -> Option<Self> {
        raw.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    fn to_cell(&self) -> String {
        self.to_string()
    }
}

/// Dates accept ISO-8601 (`2024-02-02`) and the slash form (`2024/02/02`).
/// A datetime whose date part parses is also accepted, since spreadsheet
/// date cells often carry a midnight time.
impl FromCell for NaiveDate {
    const KIND: FieldKind = FieldKind::Date;

    fn from_cell(raw: &str) -> Option<Self> {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(raw, "%Y/%m/%d"))
            .ok()
            .or_else(|| NaiveDateTime::from_cell(raw).map(|dt| dt.date()))
    }

    fn to_cell(&self) -> String {
        self.format("%Y-%m-%d").to_string()
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Datetimes accept ISO-8601 with `T` or a space separator (seconds and
/// fractions optional), RFC 3339 with an offset (converted to UTC), and a bare
/// date (midnight).
impl FromCell for NaiveDateTime {
    const KIND: FieldKind = FieldKind::DateTime;

    fn from_cell(raw: &str) -> Option<Self> {
        if let Some(dt) = DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        {
            return Some(dt);
        }
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
            return Some(dt.naive_utc());
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }

    fn to_cell(&self) -> String {
        self.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

impl FromCell for String {
    const KIND: FieldKind = FieldKind::Text;

    fn from_cell(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }

    fn to_cell(&self) -> String {
        self.clone()
    }
}

type Assign<T> = Arc<dyn Fn(&mut T, &str) -> Option<String> + Send + Sync>;
type Validator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Metadata for one importable slot of `T`.
pub struct FieldDescriptor<T> {
    column_header: String,
    slot_name: String,
    default_value: Option<String>,
    required: bool,
    kind: FieldKind,
    validator: Option<Validator>,
    assign: Assign<T>,
}

impl<T> FieldDescriptor<T> {
    fn new<V, F>(column_header: &str, setter: F) -> Self
    where
        T: 'static,
        V: FromCell,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let assign: Assign<T> = Arc::new(move |record: &mut T, raw: &str| {
            let value = V::from_cell(raw)?;
            let rendered = value.to_cell();
            setter(record, value);
            Some(rendered)
        });
        Self {
            column_header: column_header.trim().to_string(),
            slot_name: column_header.trim().to_string(),
            default_value: None,
            required: false,
            kind: V::KIND,
            validator: None,
            assign,
        }
    }

    /// Names the record slot, for logs and diagnostics. Defaults to the header.
    pub fn slot(&mut self, name: &str) -> &mut Self {
        self.slot_name = name.to_string();
        self
    }

    pub fn required(&mut self) -> &mut Self {
        self.required = true;
        self
    }

    /// Value used when the column is missing or the cell is blank.
    pub fn default_value(&mut self, value: &str) -> &mut Self {
        self.default_value = Some(value.to_string());
        self
    }

    /// Per-field check run on the coerced value's text form.
    pub fn validator<F>(&mut self, check: F) -> &mut Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(check));
        self
    }

    pub fn column_header(&self) -> &str {
        &self.column_header
    }

    pub fn slot_name(&self) -> &str {
        &self.slot_name
    }

    pub fn default(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    /// Coerces `raw` and writes it into `record`, returning the coerced text.
    /// `None` means `raw` does not parse as this slot's type.
    pub(crate) fn assign(&self, record: &mut T, raw: &str) -> Option<String> {
        (self.assign)(record, raw)
    }

    pub(crate) fn check(&self, value: &str) -> bool {
        self.validator.as_ref().map_or(true, |check| check(value))
    }
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("column_header", &self.column_header)
            .field("slot_name", &self.slot_name)
            .field("default_value", &self.default_value)
            .field("required", &self.required)
            .field("kind", &self.kind)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// A record type that can be populated from spreadsheet rows.
///
/// Slots not declared in [`ImportRecord::describe`] keep their `Default`
/// value.
///
/// ```
/// use xlsx_ingest::{FieldRegistry, ImportRecord};
///
/// #[derive(Default)]
/// struct Person {
///     name: String,
///     age: i64,
/// }
///
/// impl ImportRecord for Person {
///     fn describe(fields: &mut FieldRegistry<Self>) {
///         fields.column("name", |p: &mut Person, v: String| p.name = v).required();
///         fields.column("age", |p: &mut Person, v: i64| p.age = v).default_value("0");
///     }
/// }
/// ```
pub trait ImportRecord: Default + Send + 'static {
    fn describe(fields: &mut FieldRegistry<Self>);
}

/// Ordered descriptors for one record type.
pub struct FieldRegistry<T> {
    fields: Vec<FieldDescriptor<T>>,
}

impl<T> FieldRegistry<T> {
    fn empty() -> Self {
        Self { fields: Vec::new() }
    }

    /// Declares a column; the setter's value type picks the coercion.
    pub fn column<V, F>(&mut self, column_header: &str, setter: F) -> &mut FieldDescriptor<T>
    where
        T: 'static,
        V: FromCell,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.fields.push(FieldDescriptor::new(column_header, setter));
        let last = self.fields.len() - 1;
        &mut self.fields[last]
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor<T>> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<T: ImportRecord> FieldRegistry<T> {
    /// Collects `T`'s declarations and rejects duplicate column headers.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::DuplicateColumnHeader`] naming the first
    /// repeated header.
    pub fn build() -> IngestResult<Self> {
        let mut registry = Self::empty();
        T::describe(&mut registry);

        let mut seen = HashSet::with_capacity(registry.fields.len());
        for field in &registry.fields {
            if !seen.insert(field.column_header.as_str()) {
                return Err(IngestError::DuplicateColumnHeader(
                    field.column_header.clone(),
                ));
            }
        }
        Ok(registry)
    }
}

impl<T> fmt::Debug for FieldRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fields.iter()).finish()
    }
}
