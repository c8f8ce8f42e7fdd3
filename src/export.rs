//! Rejected-row export.
//!
//! Rejected rows are written once, at the end of an import, to
//! `<base_path>/<file name>`. The file is produced even when nothing was
//! rejected so that `fail_file_url` always resolves.

use async_trait::async_trait;
use csv_async::AsyncWriterBuilder;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::BufWriter;

use crate::IngestResult;

/// Name of the trailing column carrying the rejection reason.
pub const REASON_COLUMN: &str = "reason";

/// A raw input row that failed decoding or validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub raw_cells: Vec<String>,
    pub reason: String,
    /// 1-based position among data rows.
    pub row_index: u64,
}

/// Serializes rejected rows: one header row, then each row's original cells
/// followed by its reason.
#[async_trait]
pub trait RejectedRowWriter: Send + Sync {
    async fn write(&self, path: &Path, header: &[String], rows: &[RejectedRow])
        -> IngestResult<()>;
}

/// Header cells plus the reason column.
pub fn export_header(source_header: &[String]) -> Vec<String> {
    let mut header = source_header.to_vec();
    header.push(REASON_COLUMN.to_string());
    header
}

/// Original cells padded to the header width, then the reason.
///
/// Padding keeps the reason column aligned for rows shorter than the header.
pub fn export_row(header_width: usize, row: &RejectedRow) -> Vec<String> {
    let mut cells = row.raw_cells.clone();
    if cells.len() < header_width {
        cells.resize(header_width, String::new());
    }
    cells.push(row.reason.clone());
    cells
}

/// Applies the default name to blank input and appends `suffix` when missing.
pub fn normalize_export_name(name: Option<&str>, default_name: &str, suffix: &str) -> String {
    let name = match name.map(str::trim) {
        Some(n) if !n.is_empty() => n,
        _ => default_name,
    };
    if name.ends_with(suffix) {
        name.to_string()
    } else {
        format!("{name}{suffix}")
    }
}

/// Writes `rows` to `base_path/file_name`, creating `base_path` if needed,
/// and returns the written path.
pub async fn export_rejected(
    writer: &dyn RejectedRowWriter,
    path: &Path,
    source_header: &[String],
    rows: &[RejectedRow],
) -> IngestResult<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    writer.write(path, source_header, rows).await?;
    tracing::debug!(path = %path.display(), rows = rows.len(), "rejected rows exported");
    Ok(path.to_path_buf())
}

/// Writes rejected rows as comma-separated text.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvRejectedWriter;

#[async_trait]
impl RejectedRowWriter for CsvRejectedWriter {
    async fn write(
        &self,
        path: &Path,
        header: &[String],
        rows: &[RejectedRow],
    ) -> IngestResult<()> {
        let file = File::create(path).await?;
        let mut wtr = AsyncWriterBuilder::new()
            .flexible(true)
            .create_writer(BufWriter::new(file));

        wtr.write_record(export_header(header)).await?;
        for row in rows {
            wtr.write_record(export_row(header.len(), row)).await?;
        }
        wtr.flush().await?;
        Ok(())
    }
}
