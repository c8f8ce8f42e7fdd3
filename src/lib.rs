//! Streaming spreadsheet import into typed records.
//!
//! - Record types declare their columns once ([`ImportRecord`]); rows are
//!   decoded, defaulted and coerced from that table.
//! - Accepted records reach the caller's sink in fixed-size batches
//!   ([`ImportHooks`]); the last partial batch is flushed at stream end.
//! - Rejected rows are collected with a reason and exported to
//!   `<base_path>/<file name>` when the import ends.
//! - Progress is observable from other tasks while the import runs
//!   ([`ImportSnapshot`]).
//!
//! Data shape:
//! - Row sources yield `Vec<String>` per sheet row ([`RowSource`]); feature
//!   `xlsx` (default) reads the first worksheet of an `.xlsx` file.
//! - Counters are `u64`; `total_seen == accepted + rejected` on every read.
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
mod controller;
mod decode;
mod export;
mod field;
mod hooks;
mod listener;
mod progress;
mod source;
mod validate;
#[cfg(feature = "xlsx")]
mod xlsx;

pub use crate::config::{ImportConfig, LimitPolicy};
pub use crate::controller::{ImportController, ImportOptions};
pub use crate::decode::{decode_row, DecodedRow, HeaderIndex, RowError};
pub use crate::export::{
    export_rejected, normalize_export_name, CsvRejectedWriter, RejectedRow, RejectedRowWriter,
    REASON_COLUMN,
};
pub use crate::field::{FieldDescriptor, FieldKind, FieldRegistry, FromCell, ImportRecord};
pub use crate::hooks::{BatchFuture, ImportHooks};
pub use crate::listener::{ImportListener, ListenerSettings};
pub use crate::progress::{
    CounterSnapshot, ImportCounters, ImportOutcome, ImportProgress, ImportSnapshot, ListenerPhase,
    StatusCode,
};
pub use crate::source::{CsvRowSource, ImportFile, RowSource, VecRowSource};
pub use crate::validate::{check_record, validate_fields};
#[cfg(feature = "xlsx")]
pub use crate::xlsx::{XlsxRejectedWriter, XlsxRowSource};

use thiserror::Error;

/// Error type returned by this crate.
///
/// Per-row problems are not errors here; they are [`RowError`] values that
/// end up in the rejected-row export.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid import file: {0}")]
    InvalidFile(String),
    #[error("duplicate column header: {0}")]
    DuplicateColumnHeader(String),
    #[error("invalid import options: {0}")]
    InvalidOptions(String),
    #[error("import already started")]
    AlreadyStarted,
    #[error("row limit of {max} exceeded")]
    LimitExceeded { max: u64 },
    #[error("batch {batch} rejected by sink: {source}")]
    SinkFailure {
        batch: u64,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv_async::Error),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Task(#[from] tokio::task::JoinError),
    #[cfg(feature = "xlsx")]
    #[error(transparent)]
    XlsxRead(#[from] calamine::XlsxError),
    #[cfg(feature = "xlsx")]
    #[error(transparent)]
    XlsxWrite(#[from] rust_xlsxwriter::XlsxError),
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;
