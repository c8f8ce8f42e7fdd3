use async_trait::async_trait;
use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader};

use crate::IngestResult;

/// A lazy producer of raw sheet rows, header row included.
///
/// Rows come out in sheet order starting at sheet row 0; the listener decides
/// which one is the header.
#[async_trait]
pub trait RowSource: Send {
    /// Next row's cells as text, or `None` once the sheet is exhausted.
    async fn next_row(&mut self) -> IngestResult<Option<Vec<String>>>;

    /// Rows still to come, when the source knows it.
    fn remaining_rows(&self) -> Option<u64> {
        None
    }
}

/// Rows already in memory.
#[derive(Debug, Clone)]
pub struct VecRowSource {
    rows: std::vec::IntoIter<Vec<String>>,
}

impl VecRowSource {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }

    /// Convenience for literal tables.
    pub fn from_strs(rows: &[&[&str]]) -> Self {
        Self::new(
            rows.iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }
}

#[async_trait]
impl RowSource for VecRowSource {
    async fn next_row(&mut self) -> IngestResult<Option<Vec<String>>> {
        Ok(self.rows.next())
    }

    fn remaining_rows(&self) -> Option<u64> {
        Some(self.rows.len() as u64)
    }
}

/// Rows from delimited text, e.g. a sheet saved as CSV.
///
/// Every line is a row, the header line included, and rows may differ in
/// width.
pub struct CsvRowSource<R> {
    rdr: AsyncReader<R>,
    record: StringRecord,
}

impl<R> CsvRowSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self::with_delimiter(reader, b',')
    }

    pub fn with_delimiter(reader: R, delimiter: u8) -> Self {
        let rdr = AsyncReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            // Larger internal buffer reduces syscalls and allocator churn
            .buffer_capacity(1 << 20) // 1 MiB
            .create_reader(reader);
        Self {
            rdr,
            record: StringRecord::new(),
        }
    }
}

impl CsvRowSource<BufReader<File>> {
    /// Opens a local file.
    pub async fn open(path: &Path) -> IngestResult<Self> {
        let file = File::open(path).await?;
        Ok(Self::new(BufReader::with_capacity(1 << 20, file)))
    }
}

#[async_trait]
impl<R> RowSource for CsvRowSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_row(&mut self) -> IngestResult<Option<Vec<String>>> {
        if !self.rdr.read_record(&mut self.record).await? {
            return Ok(None);
        }
        Ok(Some(self.record.iter().map(str::to_string).collect()))
    }
}

/// The uploaded file: its original name plus the rows inside it.
///
/// The name is what suffix validation looks at; a missing name is an
/// invalid file.
#[derive(Debug)]
pub struct ImportFile<S> {
    name: Option<String>,
    source: S,
}

impl<S: RowSource> ImportFile<S> {
    pub fn new(name: Option<String>, source: S) -> Self {
        Self { name, source }
    }

    pub fn named(name: impl Into<String>, source: S) -> Self {
        Self::new(Some(name.into()), source)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn into_source(self) -> S {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn csv_rows_keep_header_and_ragged_widths() {
        let data: &[u8] = b"sku,qty\nA,1\nB\n\"C,D\",3\n";
        let mut source = CsvRowSource::new(data);

        assert_eq!(source.next_row().await.unwrap().unwrap(), vec!["sku", "qty"]);
        assert_eq!(source.next_row().await.unwrap().unwrap(), vec!["A", "1"]);
        assert_eq!(source.next_row().await.unwrap().unwrap(), vec!["B"]);
        assert_eq!(source.next_row().await.unwrap().unwrap(), vec!["C,D", "3"]);
        assert!(source.next_row().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn vec_source_counts_down() {
        let mut source = VecRowSource::from_strs(&[&["h"], &["1"], &["2"]]);
        assert_eq!(source.remaining_rows(), Some(3));
        source.next_row().await.unwrap();
        assert_eq!(source.remaining_rows(), Some(2));
    }
}
