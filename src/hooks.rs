//! Caller-supplied hooks invoked by the listener.
//!
//! Only the batch sink is mandatory; every other hook defaults to a no-op.
//! Call order per import: for each batch `before_import` then `import_batch`;
//! `check_record` once per decoded row; `after_import` once after the last
//! batch.

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::progress::CounterSnapshot;

pub type BatchFuture = BoxFuture<'static, anyhow::Result<()>>;

type BeforeImport<T> = Arc<dyn Fn(&mut Vec<T>) + Send + Sync>;
type ImportBatch<T> = Arc<dyn Fn(Vec<T>) -> BatchFuture + Send + Sync>;
type AfterImport = Arc<dyn Fn(CounterSnapshot) + Send + Sync>;
pub(crate) type CheckRecord<T> = dyn Fn(&T) -> bool + Send + Sync;

pub struct ImportHooks<T> {
    before_import: Option<BeforeImport<T>>,
    import_batch: ImportBatch<T>,
    after_import: Option<AfterImport>,
    check_record: Option<Arc<CheckRecord<T>>>,
}

impl<T: Send + 'static> ImportHooks<T> {
    /// Hooks around `import_batch`, the sink that receives each batch.
    ///
    /// An `Err` from the sink aborts the import; batches are never retried.
    pub fn new<F, Fut>(import_batch: F) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            before_import: None,
            import_batch: Arc::new(move |batch: Vec<T>| import_batch(batch).boxed()),
            after_import: None,
            check_record: None,
        }
    }

    /// Runs on each batch right before it reaches the sink; may edit it.
    #[must_use]
    pub fn before_import<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Vec<T>) + Send + Sync + 'static,
    {
        self.before_import = Some(Arc::new(hook));
        self
    }

    /// Runs once after every batch was handed to the sink.
    #[must_use]
    pub fn after_import<F>(mut self, hook: F) -> Self
    where
        F: Fn(CounterSnapshot) + Send + Sync + 'static,
    {
        self.after_import = Some(Arc::new(hook));
        self
    }

    /// Record-level validation; `false` rejects the row.
    #[must_use]
    pub fn check_record<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.check_record = Some(Arc::new(hook));
        self
    }
}

impl<T> ImportHooks<T> {
    pub(crate) fn run_before_import(&self, batch: &mut Vec<T>) {
        if let Some(hook) = &self.before_import {
            hook(batch);
        }
    }

    pub(crate) fn run_import_batch(&self, batch: Vec<T>) -> BatchFuture {
        (self.import_batch)(batch)
    }

    pub(crate) fn run_after_import(&self, counts: CounterSnapshot) {
        if let Some(hook) = &self.after_import {
            hook(counts);
        }
    }

    pub(crate) fn record_check(&self) -> Option<&CheckRecord<T>> {
        self.check_record.as_deref()
    }
}

impl<T> Clone for ImportHooks<T> {
    fn clone(&self) -> Self {
        Self {
            before_import: self.before_import.clone(),
            import_batch: Arc::clone(&self.import_batch),
            after_import: self.after_import.clone(),
            check_record: self.check_record.clone(),
        }
    }
}

impl<T> fmt::Debug for ImportHooks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportHooks")
            .field("before_import", &self.before_import.is_some())
            .field("after_import", &self.after_import.is_some())
            .field("check_record", &self.check_record.is_some())
            .finish_non_exhaustive()
    }
}
