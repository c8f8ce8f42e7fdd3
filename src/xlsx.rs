//! `.xlsx` row source and rejected-row writer.
//!
//! Both sides are synchronous libraries, so the workbook is opened and saved
//! on the blocking pool.

use async_trait::async_trait;
use calamine::{open_workbook, Data, DataType, Range, Reader, Xlsx};
use chrono::Timelike;
use rust_xlsxwriter::Workbook;
use std::path::{Path, PathBuf};

use crate::export::{export_header, export_row, RejectedRow, RejectedRowWriter};
use crate::source::ImportFile;
use crate::{IngestError, IngestResult};

/// Rows of the first worksheet of an `.xlsx` file.
///
/// Nothing is read until the first `next_row`. Sheet row indices are
/// absolute: empty rows and columns in front of the used range come out as
/// empty rows and cells.
pub struct XlsxRowSource {
    path: PathBuf,
    sheet: Option<LoadedSheet>,
}

struct LoadedSheet {
    range: Range<Data>,
    /// Absolute sheet position of the range's top-left cell.
    origin: (usize, usize),
    next_row: usize,
}

impl LoadedSheet {
    fn total_rows(&self) -> usize {
        if self.range.is_empty() {
            0
        } else {
            self.origin.0 + self.range.height()
        }
    }

    fn row(&self, abs_row: usize) -> Vec<String> {
        if abs_row < self.origin.0 {
            return Vec::new();
        }
        let rel_row = abs_row - self.origin.0;
        let mut cells = vec![String::new(); self.origin.1];
        cells.extend((0..self.range.width()).map(|col| {
            self.range
                .get((rel_row, col))
                .map(cell_text)
                .unwrap_or_default()
        }));
        while cells.last().is_some_and(|c| c.is_empty()) {
            cells.pop();
        }
        cells
    }
}

/// Renders a cell the way a user typed it: whole floats without `.0`,
/// dates as ISO-8601.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(_) => match cell.as_datetime() {
            Some(dt) if dt.num_seconds_from_midnight() == 0 && dt.nanosecond() == 0 => {
                dt.format("%Y-%m-%d").to_string()
            }
            Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            None => cell.to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => e.to_string(),
    }
}

fn load_first_sheet(path: &Path) -> IngestResult<LoadedSheet> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range?,
        None => Range::empty(),
    };
    let origin = range
        .start()
        .map(|(row, col)| (row as usize, col as usize))
        .unwrap_or_default();
    Ok(LoadedSheet {
        range,
        origin,
        next_row: 0,
    })
}

impl XlsxRowSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sheet: None,
        }
    }
}

#[async_trait]
impl crate::source::RowSource for XlsxRowSource {
    async fn next_row(&mut self) -> IngestResult<Option<Vec<String>>> {
        if self.sheet.is_none() {
            let path = self.path.clone();
            let sheet = tokio::task::spawn_blocking(move || load_first_sheet(&path)).await??;
            tracing::debug!(
                path = %self.path.display(),
                rows = sheet.total_rows(),
                "worksheet loaded"
            );
            self.sheet = Some(sheet);
        }
        let Some(sheet) = self.sheet.as_mut() else {
            return Ok(None);
        };
        if sheet.next_row >= sheet.total_rows() {
            return Ok(None);
        }
        let row = sheet.row(sheet.next_row);
        sheet.next_row += 1;
        Ok(Some(row))
    }

    fn remaining_rows(&self) -> Option<u64> {
        self.sheet
            .as_ref()
            .map(|s| s.total_rows().saturating_sub(s.next_row) as u64)
    }
}

impl ImportFile<XlsxRowSource> {
    /// A local `.xlsx` file, named after its file name.
    pub fn xlsx(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .map(str::to_string);
        ImportFile::new(name, XlsxRowSource::new(path))
    }
}

/// Writes rejected rows to a single-sheet `.xlsx` workbook.
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxRejectedWriter;

fn write_workbook(path: &Path, header: &[String], rows: &[RejectedRow]) -> IngestResult<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    for (col, text) in export_header(header).iter().enumerate() {
        sheet.write_string(0, column(col)?, text)?;
    }
    for (idx, row) in rows.iter().enumerate() {
        let line = u32::try_from(idx + 1)
            .map_err(|_| IngestError::InvalidOptions("too many rejected rows".into()))?;
        for (col, text) in export_row(header.len(), row).iter().enumerate() {
            if !text.is_empty() {
                sheet.write_string(line, column(col)?, text)?;
            }
        }
    }
    workbook.save(path)?;
    Ok(())
}

fn column(idx: usize) -> IngestResult<u16> {
    u16::try_from(idx).map_err(|_| IngestError::InvalidOptions(format!("column {idx} out of range")))
}

#[async_trait]
impl RejectedRowWriter for XlsxRejectedWriter {
    async fn write(
        &self,
        path: &Path,
        header: &[String],
        rows: &[RejectedRow],
    ) -> IngestResult<()> {
        let path = path.to_path_buf();
        let header = header.to_vec();
        let rows = rows.to_vec();
        tokio::task::spawn_blocking(move || write_workbook(&path, &header, &rows)).await?
    }
}
