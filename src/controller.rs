//! Import entry point.
//!
//! An [`ImportController`] owns one uploaded file. It is started once,
//! either awaited to completion ([`ImportController::start_import`]) or
//! detached onto the runtime ([`ImportController::start_import_async`]).
//! Observers can take snapshots from any task at any time.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{ImportConfig, LimitPolicy};
use crate::export::{normalize_export_name, CsvRejectedWriter, RejectedRowWriter};
use crate::field::{FieldRegistry, ImportRecord};
use crate::hooks::ImportHooks;
use crate::listener::{ImportListener, ListenerSettings};
use crate::progress::{ImportOutcome, ImportProgress, ImportSnapshot};
use crate::source::{ImportFile, RowSource};
use crate::{IngestError, IngestResult};

/// Per-import settings, seeded from an [`ImportConfig`].
#[derive(Debug, Clone)]
pub struct ImportOptions {
    header_row_index: usize,
    max_allowed_rows: u64,
    batch_size: usize,
    rejected_export_name: Option<String>,
    expected_rows: Option<u64>,
    limit_policy: LimitPolicy,
    config: ImportConfig,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::from_config(ImportConfig::default())
    }
}

impl ImportOptions {
    pub fn from_config(config: ImportConfig) -> Self {
        Self {
            header_row_index: config.header_row_index,
            max_allowed_rows: config.max_allowed_rows,
            batch_size: config.batch_size,
            rejected_export_name: None,
            expected_rows: None,
            limit_policy: config.limit_policy,
            config,
        }
    }

    /// Sheet row (0-based) holding the column headers.
    #[must_use]
    pub fn header_row_index(mut self, index: usize) -> Self {
        self.header_row_index = index;
        self
    }

    #[must_use]
    pub fn max_allowed_rows(mut self, max: u64) -> Self {
        self.max_allowed_rows = max;
        self
    }

    /// Accepted records per sink call; must be positive.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Rejected-row file name; the spreadsheet suffix is appended if missing.
    #[must_use]
    pub fn rejected_export_name(mut self, name: impl Into<String>) -> Self {
        self.rejected_export_name = Some(name.into());
        self
    }

    /// Data rows the caller expects; progress percentages are relative to it.
    #[must_use]
    pub fn expected_rows(mut self, rows: u64) -> Self {
        self.expected_rows = Some(rows);
        self
    }

    #[must_use]
    pub fn limit_policy(mut self, policy: LimitPolicy) -> Self {
        self.limit_policy = policy;
        self
    }

    fn validate(&self) -> IngestResult<()> {
        if self.batch_size == 0 {
            return Err(IngestError::InvalidOptions(
                "batch size must be greater than zero".into(),
            ));
        }
        if self.max_allowed_rows >= u64::from(u32::MAX) {
            return Err(IngestError::InvalidOptions(format!(
                "max allowed rows must be below {}",
                u32::MAX
            )));
        }
        Ok(())
    }

    fn fail_file_path(&self) -> PathBuf {
        let name = normalize_export_name(
            self.rejected_export_name.as_deref(),
            &self.config.rejected_export_name,
            &self.config.spreadsheet_suffix,
        );
        self.config.export_base_path.join(name)
    }

    fn listener_settings(&self) -> ListenerSettings {
        ListenerSettings {
            header_row_index: self.header_row_index,
            max_allowed_rows: self.max_allowed_rows,
            batch_size: self.batch_size,
            limit_policy: self.limit_policy,
            declared_source_count: self.expected_rows.is_some(),
        }
    }
}

#[cfg(feature = "xlsx")]
fn default_writer() -> Arc<dyn RejectedRowWriter> {
    Arc::new(crate::xlsx::XlsxRejectedWriter)
}

#[cfg(not(feature = "xlsx"))]
fn default_writer() -> Arc<dyn RejectedRowWriter> {
    Arc::new(CsvRejectedWriter)
}

/// Drives one import of one file into records of type `T`.
pub struct ImportController<T: ImportRecord, S: RowSource> {
    file_name: Option<String>,
    file: Mutex<Option<ImportFile<S>>>,
    fields: Arc<FieldRegistry<T>>,
    hooks: ImportHooks<T>,
    options: ImportOptions,
    writer: Arc<dyn RejectedRowWriter>,
    progress: Arc<ImportProgress>,
}

impl<T: ImportRecord, S: RowSource + 'static> ImportController<T, S> {
    /// Builds the field registry for `T` and checks the options. Nothing is
    /// read from `file` yet.
    ///
    /// # Errors
    ///
    /// [`IngestError::DuplicateColumnHeader`] if `T` declares a header twice,
    /// [`IngestError::InvalidOptions`] for a zero batch size or an
    /// out-of-range row limit.
    pub fn new(
        file: ImportFile<S>,
        hooks: ImportHooks<T>,
        options: ImportOptions,
    ) -> IngestResult<Self> {
        let fields = FieldRegistry::<T>::build()?;
        options.validate()?;
        let progress = ImportProgress::new(
            options.expected_rows.unwrap_or(0),
            options.fail_file_path(),
        );
        Ok(Self {
            file_name: file.name().map(str::to_string),
            file: Mutex::new(Some(file)),
            fields: Arc::new(fields),
            hooks,
            options,
            writer: default_writer(),
            progress: Arc::new(progress),
        })
    }

    /// Replaces the rejected-row serializer.
    #[must_use]
    pub fn with_rejected_writer(mut self, writer: Arc<dyn RejectedRowWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Writes rejected rows as CSV text instead of a workbook.
    #[must_use]
    pub fn with_csv_rejected_writer(self) -> Self {
        self.with_rejected_writer(Arc::new(CsvRejectedWriter))
    }

    /// Runs the import to completion.
    ///
    /// # Errors
    ///
    /// Entry errors ([`IngestError::InvalidFile`],
    /// [`IngestError::AlreadyStarted`]) are returned without touching
    /// progress. Terminal errors ([`IngestError::LimitExceeded`],
    /// [`IngestError::SinkFailure`], source or export failures) are returned
    /// after the rejected-row file was written and the snapshot shows
    /// `FINISHED`.
    pub async fn start_import(&self) -> IngestResult<ImportSnapshot> {
        let listener_run = self.prepare()?;
        listener_run.await?;
        Ok(self.snapshot())
    }

    /// Detaches the import onto the Tokio runtime and returns at once.
    ///
    /// Errors never reach the caller: they are logged and recorded in the
    /// snapshot's `outcome` and `error`.
    pub fn start_import_async(&self) -> JoinHandle<()> {
        let file_name = self.file_name.clone().unwrap_or_default();
        let progress = Arc::clone(&self.progress);
        let prepared = self.prepare();

        tokio::spawn(async move {
            let result = match prepared {
                Ok(run) => run.await,
                // The import already running owns the progress.
                Err(e @ IngestError::AlreadyStarted) => Err(e),
                Err(e) => {
                    progress.finish(ImportOutcome::Failed, Some(e.to_string()));
                    Err(e)
                }
            };
            if let Err(e) = result {
                let counts = progress.counters().snapshot();
                error!(
                    file = %file_name,
                    error = %e,
                    total = counts.total_seen,
                    accepted = counts.accepted,
                    rejected = counts.rejected,
                    "async import failed"
                );
            }
        })
    }

    /// Validates the file and builds the listener run without polling it.
    fn prepare(&self) -> IngestResult<impl Future<Output = IngestResult<()>> + Send + 'static> {
        let mut slot = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let file = slot.as_ref().ok_or(IngestError::AlreadyStarted)?;
        let name = check_file_name(file.name(), &self.options.config.spreadsheet_suffix)?;
        let source = match slot.take() {
            Some(file) => file.into_source(),
            None => return Err(IngestError::AlreadyStarted),
        };
        drop(slot);

        self.progress.mark_started();
        info!(
            file = %name,
            header_row = self.options.header_row_index,
            batch_size = self.options.batch_size,
            max_rows = self.options.max_allowed_rows,
            "import started"
        );

        let listener = ImportListener::new(
            name,
            Arc::clone(&self.fields),
            self.hooks.clone(),
            self.options.listener_settings(),
            Arc::clone(&self.progress),
            Arc::clone(&self.writer),
        );
        Ok(listener.run(source))
    }

    pub fn snapshot(&self) -> ImportSnapshot {
        self.progress.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.progress.is_finished()
    }

    /// Milliseconds from start to finish, `None` until finished.
    pub fn elapsed_millis(&self) -> Option<i64> {
        self.progress.elapsed_millis()
    }

    pub fn progress_percent(&self) -> String {
        self.progress.progress_percent()
    }

    /// Where the rejected-row file is (or will be) written.
    pub fn fail_file_path(&self) -> &Path {
        self.progress.fail_file()
    }

    /// Shared progress handle for observers on other tasks.
    pub fn progress(&self) -> Arc<ImportProgress> {
        Arc::clone(&self.progress)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }
}

fn check_file_name(name: Option<&str>, suffix: &str) -> IngestResult<String> {
    match name.map(str::trim) {
        None | Some("") => Err(IngestError::InvalidFile("file has no name".into())),
        Some(n) if !n.ends_with(suffix) => Err(IngestError::InvalidFile(format!(
            "'{n}' is not a {suffix} spreadsheet"
        ))),
        Some(n) => Ok(n.to_string()),
    }
}
