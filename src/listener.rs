//! The row-stream consumer.
//!
//! [`ImportListener`] owns the batch buffer and the rejected rows. It is
//! driven by a single task: rows before the header are skipped, the header
//! row builds the [`HeaderIndex`], every later row is decoded, validated and
//! either buffered or rejected. A full buffer is flushed to the sink; the
//! final partial buffer is flushed at stream end.
//!
//! Phases: `Init → ReadingHeader → ReadingData ⇄ Flushing → Finalizing →
//! Done`, with terminal branches for the row limit, a failing sink and any
//! other error.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::LimitPolicy;
use crate::decode::{decode_row, HeaderIndex, RowError};
use crate::export::{export_rejected, RejectedRow, RejectedRowWriter};
use crate::field::{FieldRegistry, ImportRecord};
use crate::hooks::ImportHooks;
use crate::progress::{ImportOutcome, ImportProgress, ListenerPhase};
use crate::source::RowSource;
use crate::validate::{check_record, validate_fields};
use crate::{IngestError, IngestResult};

/// Row-handling limits for one import.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub header_row_index: usize,
    pub max_allowed_rows: u64,
    pub batch_size: usize,
    pub limit_policy: LimitPolicy,
    /// Whether `source_count` was declared by the caller.
    pub declared_source_count: bool,
}

enum RowFlow {
    Continue,
    LimitReached,
}

enum StreamEnd {
    Exhausted,
    LimitReached,
}

pub struct ImportListener<T: ImportRecord> {
    file_name: String,
    fields: Arc<FieldRegistry<T>>,
    hooks: ImportHooks<T>,
    settings: ListenerSettings,
    progress: Arc<ImportProgress>,
    writer: Arc<dyn RejectedRowWriter>,
    header: HeaderIndex,
    buffer: Vec<T>,
    rejected: Vec<RejectedRow>,
    data_rows: u64,
    batches: u64,
}

impl<T: ImportRecord> ImportListener<T> {
    pub fn new(
        file_name: String,
        fields: Arc<FieldRegistry<T>>,
        hooks: ImportHooks<T>,
        settings: ListenerSettings,
        progress: Arc<ImportProgress>,
        writer: Arc<dyn RejectedRowWriter>,
    ) -> Self {
        let capacity = settings.batch_size.min(64 * 1024);
        Self {
            file_name,
            fields,
            hooks,
            settings,
            progress,
            writer,
            header: HeaderIndex::default(),
            buffer: Vec::with_capacity(capacity),
            rejected: Vec::new(),
            data_rows: 0,
            batches: 0,
        }
    }

    /// Consumes `source` to a terminal state, writes the rejected-row file
    /// and records the outcome on the shared progress.
    ///
    /// # Errors
    ///
    /// [`IngestError::LimitExceeded`] when the row ceiling was hit,
    /// [`IngestError::SinkFailure`] when a batch was refused, or whatever
    /// reading the source or writing the export failed with.
    pub async fn run<S: RowSource>(mut self, mut source: S) -> IngestResult<()> {
        self.progress.set_phase(ListenerPhase::ReadingHeader);
        let end = self.consume(&mut source).await;
        drop(source);
        self.finalize(end).await
    }

    async fn consume<S: RowSource>(&mut self, source: &mut S) -> IngestResult<StreamEnd> {
        let mut sheet_row = 0usize;
        while let Some(cells) = source.next_row().await? {
            let idx = sheet_row;
            sheet_row += 1;

            if idx < self.settings.header_row_index {
                continue;
            }
            if idx == self.settings.header_row_index {
                self.on_header(&cells);
                if !self.settings.declared_source_count {
                    if let Some(rows) = source.remaining_rows() {
                        self.progress.discover_source_count(rows);
                    }
                }
                continue;
            }
            if is_blank(&cells) {
                debug!(file = %self.file_name, sheet_row = idx, "blank row skipped");
                continue;
            }
            if let RowFlow::LimitReached = self.on_row(cells).await? {
                return Ok(StreamEnd::LimitReached);
            }
        }
        Ok(StreamEnd::Exhausted)
    }

    fn on_header(&mut self, cells: &[String]) {
        self.header = HeaderIndex::from_row(cells);
        self.progress.set_phase(ListenerPhase::ReadingData);
        debug!(file = %self.file_name, columns = ?self.header.names(), "header row read");
    }

    async fn on_row(&mut self, cells: Vec<String>) -> IngestResult<RowFlow> {
        let row = self.data_rows + 1;

        if self.progress.counters().total_seen() >= self.settings.max_allowed_rows {
            let max = self.settings.max_allowed_rows;
            warn!(file = %self.file_name, row, max, "row limit exceeded, stopping import");
            if self.settings.limit_policy == LimitPolicy::RejectOverflowRow {
                self.data_rows = row;
                self.reject(cells, row, RowError::LimitExceeded { row, max });
            }
            return Ok(RowFlow::LimitReached);
        }
        self.data_rows = row;

        match self.accept(&cells, row) {
            Ok(record) => {
                self.buffer.push(record);
                self.progress.counters().record_accepted();
                if self.buffer.len() >= self.settings.batch_size {
                    self.flush().await?;
                    self.progress.set_phase(ListenerPhase::ReadingData);
                }
            }
            Err(reason) => self.reject(cells, row, reason),
        }
        Ok(RowFlow::Continue)
    }

    fn accept(&self, cells: &[String], row: u64) -> Result<T, RowError> {
        let decoded = decode_row(&self.fields, &self.header, cells, row)?;
        validate_fields(&self.fields, &decoded, row)?;
        check_record(self.hooks.record_check(), &decoded.record, row)?;
        Ok(decoded.record)
    }

    fn reject(&mut self, raw_cells: Vec<String>, row_index: u64, reason: RowError) {
        debug!(file = %self.file_name, row = row_index, %reason, "row rejected");
        self.rejected.push(RejectedRow {
            raw_cells,
            reason: reason.to_string(),
            row_index,
        });
        self.progress.counters().record_rejected();
    }

    /// Hands the buffer to the sink. The buffer is empty afterwards whether
    /// or not the sink succeeded.
    async fn flush(&mut self) -> IngestResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.progress.set_phase(ListenerPhase::Flushing);
        let mut batch = std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(self.settings.batch_size.min(64 * 1024)),
        );
        self.batches += 1;
        let batch_no = self.batches;

        self.hooks.run_before_import(&mut batch);
        let size = batch.len();
        if let Err(e) = self.hooks.run_import_batch(batch).await {
            error!(file = %self.file_name, batch = batch_no, size, error = %e, "batch sink failed");
            return Err(IngestError::SinkFailure {
                batch: batch_no,
                source: e.into(),
            });
        }
        debug!(file = %self.file_name, batch = batch_no, size, "batch imported");
        Ok(())
    }

    /// Flushes what is buffered, runs `after_import` unless a batch was
    /// refused or the source failed, writes the rejected-row file and records
    /// the outcome. Records accepted before a source failure still reach the
    /// sink, so batch sizes always add up to the accepted count.
    async fn finalize(mut self, end: IngestResult<StreamEnd>) -> IngestResult<()> {
        self.progress.set_phase(ListenerPhase::Finalizing);

        let result = match end {
            Ok(end) => match self.flush().await {
                Ok(()) => {
                    self.progress.set_phase(ListenerPhase::Finalizing);
                    self.hooks.run_after_import(self.progress.counters().snapshot());
                    match end {
                        StreamEnd::Exhausted => Ok(()),
                        StreamEnd::LimitReached => Err(IngestError::LimitExceeded {
                            max: self.settings.max_allowed_rows,
                        }),
                    }
                }
                Err(e) => Err(e),
            },
            Err(e) => {
                if let Err(flush_err) = self.flush().await {
                    error!(
                        file = %self.file_name,
                        error = %flush_err,
                        "flush after source failure failed"
                    );
                }
                self.progress.set_phase(ListenerPhase::Finalizing);
                Err(e)
            }
        };

        let export = export_rejected(
            self.writer.as_ref(),
            self.progress.fail_file(),
            self.header.names(),
            &self.rejected,
        )
        .await;

        let result = match (result, export) {
            (Err(e), Err(export_err)) => {
                error!(file = %self.file_name, error = %export_err, "rejected-row export failed");
                Err(e)
            }
            (Err(e), Ok(_)) => Err(e),
            (Ok(()), export) => export.map(|_: PathBuf| ()),
        };

        let counts = self.progress.counters().snapshot();
        let outcome = match &result {
            Ok(()) => ImportOutcome::Completed,
            Err(IngestError::LimitExceeded { .. }) => ImportOutcome::LimitExceeded,
            Err(IngestError::SinkFailure { .. }) => ImportOutcome::SinkFailed,
            Err(_) => ImportOutcome::Failed,
        };
        self.progress
            .finish(outcome, result.as_ref().err().map(ToString::to_string));

        info!(
            file = %self.file_name,
            ?outcome,
            total = counts.total_seen,
            accepted = counts.accepted,
            rejected = counts.rejected,
            batches = self.batches,
            elapsed_ms = self.progress.elapsed_millis().unwrap_or_default(),
            "import finished"
        );
        result
    }
}

/// A sheet row with no non-blank cell. Such rows are not data rows.
fn is_blank(cells: &[String]) -> bool {
    cells.iter().all(|c| c.trim().is_empty())
}
