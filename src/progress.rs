//! Progress state shared between the ingesting task and observers.
//!
//! The ingesting task is the only writer. Observers read through
//! [`ImportProgress::snapshot`] at any time without blocking ingestion.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

const ACCEPTED_SHIFT: u32 = 32;
const REJECTED_MASK: u64 = (1 << ACCEPTED_SHIFT) - 1;

/// Accepted and rejected counts packed into one word.
///
/// Accepted lives in the high half, rejected in the low half, and
/// `total_seen` is their sum, so every load is a consistent snapshot.
/// Each half holds up to `u32::MAX`; import options cap row limits there.
#[derive(Debug, Default)]
pub struct ImportCounters {
    packed: AtomicU64,
}

/// One consistent read of [`ImportCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub total_seen: u64,
    pub accepted: u64,
    pub rejected: u64,
}

impl ImportCounters {
    pub fn record_accepted(&self) {
        self.packed.fetch_add(1 << ACCEPTED_SHIFT, Ordering::AcqRel);
    }

    pub fn record_rejected(&self) {
        self.packed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let word = self.packed.load(Ordering::Acquire);
        let accepted = word >> ACCEPTED_SHIFT;
        let rejected = word & REJECTED_MASK;
        CounterSnapshot {
            total_seen: accepted + rejected,
            accepted,
            rejected,
        }
    }

    pub fn total_seen(&self) -> u64 {
        self.snapshot().total_seen
    }
}

/// Listener state machine, readable by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ListenerPhase {
    Init = 0,
    ReadingHeader,
    ReadingData,
    Flushing,
    Finalizing,
    Done,
    DoneLimitExceeded,
    DoneSinkFailed,
    DoneFailed,
}

impl ListenerPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::ReadingHeader,
            2 => Self::ReadingData,
            3 => Self::Flushing,
            4 => Self::Finalizing,
            5 => Self::Done,
            6 => Self::DoneLimitExceeded,
            7 => Self::DoneSinkFailed,
            8 => Self::DoneFailed,
            _ => Self::Init,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::DoneLimitExceeded | Self::DoneSinkFailed | Self::DoneFailed
        )
    }
}

/// How a finished import ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportOutcome {
    Completed,
    LimitExceeded,
    SinkFailed,
    Failed,
}

impl ImportOutcome {
    fn phase(self) -> ListenerPhase {
        match self {
            Self::Completed => ListenerPhase::Done,
            Self::LimitExceeded => ListenerPhase::DoneLimitExceeded,
            Self::SinkFailed => ListenerPhase::DoneSinkFailed,
            Self::Failed => ListenerPhase::DoneFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    InProgress,
    Finished,
}

impl StatusCode {
    /// Numeric result code: `10000` finished, `10001` still running.
    pub fn code(self) -> u32 {
        match self {
            Self::Finished => 10000,
            Self::InProgress => 10001,
        }
    }
}

/// Point-in-time view of an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSnapshot {
    pub status: StatusCode,
    pub message: String,
    /// Rounded percentage of `source_count`, e.g. `"37%"`.
    pub progress: String,
    pub elapsed_millis: Option<i64>,
    pub source_count: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub total_count: u64,
    pub fail_file_url: String,
    pub phase: ListenerPhase,
    pub outcome: Option<ImportOutcome>,
    pub error: Option<String>,
}

/// Shared import state. Written only by the ingesting task.
#[derive(Debug)]
pub struct ImportProgress {
    counters: ImportCounters,
    phase: AtomicU8,
    started: AtomicBool,
    finished: AtomicBool,
    start_millis: AtomicI64,
    end_millis: AtomicI64,
    source_count: AtomicU64,
    fail_file: PathBuf,
    terminal: Mutex<Option<(ImportOutcome, Option<String>)>>,
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ImportProgress {
    pub fn new(expected_rows: u64, fail_file: PathBuf) -> Self {
        Self {
            counters: ImportCounters::default(),
            phase: AtomicU8::new(ListenerPhase::Init as u8),
            started: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            start_millis: AtomicI64::new(0),
            end_millis: AtomicI64::new(0),
            source_count: AtomicU64::new(expected_rows),
            fail_file,
            terminal: Mutex::new(None),
        }
    }

    pub fn counters(&self) -> &ImportCounters {
        &self.counters
    }

    pub fn phase(&self) -> ListenerPhase {
        ListenerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: ListenerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn mark_started(&self) {
        self.start_millis.store(now_millis(), Ordering::Release);
        self.started.store(true, Ordering::Release);
    }

    /// Fills in `source_count` when the caller declared none.
    pub(crate) fn discover_source_count(&self, rows: u64) {
        let _ = self
            .source_count
            .compare_exchange(0, rows, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Records the terminal state. The first call wins.
    pub(crate) fn finish(&self, outcome: ImportOutcome, error: Option<String>) {
        let mut terminal = match self.terminal.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if terminal.is_some() {
            return;
        }
        *terminal = Some((outcome, error));
        self.end_millis.store(now_millis(), Ordering::Release);
        self.set_phase(outcome.phase());
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// `end - start` once finished, `None` while running.
    pub fn elapsed_millis(&self) -> Option<i64> {
        if !self.is_finished() {
            return None;
        }
        let start = self.start_millis.load(Ordering::Acquire);
        let end = self.end_millis.load(Ordering::Acquire);
        Some(if start == 0 { 0 } else { (end - start).max(0) })
    }

    pub fn source_count(&self) -> u64 {
        self.source_count.load(Ordering::Acquire)
    }

    pub fn progress_percent(&self) -> String {
        let total = self.counters.total_seen();
        let source = self.source_count();
        if !self.started.load(Ordering::Acquire) || total == 0 || source == 0 {
            return "0%".to_string();
        }
        format!("{}%", (total as f64 / source as f64 * 100.0).round() as u64)
    }

    pub fn fail_file(&self) -> &Path {
        &self.fail_file
    }

    pub fn outcome(&self) -> Option<(ImportOutcome, Option<String>)> {
        match self.terminal.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn snapshot(&self) -> ImportSnapshot {
        let counts = self.counters.snapshot();
        let (outcome, error) = match self.outcome() {
            Some((outcome, error)) => (Some(outcome), error),
            None => (None, None),
        };
        let (status, message) = if self.is_finished() {
            let message = match outcome {
                Some(ImportOutcome::LimitExceeded) => "import finished: row limit exceeded",
                Some(ImportOutcome::SinkFailed) => "import finished: batch sink failed",
                Some(ImportOutcome::Failed) => "import failed",
                _ => "import finished",
            };
            (StatusCode::Finished, message)
        } else {
            (StatusCode::InProgress, "import in progress")
        };

        ImportSnapshot {
            status,
            message: message.to_string(),
            progress: self.progress_percent(),
            elapsed_millis: self.elapsed_millis(),
            source_count: self.source_count(),
            success_count: counts.accepted,
            fail_count: counts.rejected,
            total_count: counts.total_seen,
            fail_file_url: self.fail_file.display().to_string(),
            phase: self.phase(),
            outcome,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn packed_counters_stay_consistent() {
        let counters = ImportCounters::default();
        counters.record_accepted();
        counters.record_accepted();
        counters.record_rejected();
        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                total_seen: 3,
                accepted: 2,
                rejected: 1
            }
        );
    }

    #[test]
    fn concurrent_readers_never_see_torn_counts() {
        let progress = Arc::new(ImportProgress::new(0, PathBuf::from("x.xlsx")));
        let writer = {
            let progress = Arc::clone(&progress);
            std::thread::spawn(move || {
                for i in 0..20_000 {
                    if i % 3 == 0 {
                        progress.counters().record_rejected();
                    } else {
                        progress.counters().record_accepted();
                    }
                }
            })
        };
        for _ in 0..5_000 {
            let s = progress.counters().snapshot();
            assert_eq!(s.accepted + s.rejected, s.total_seen);
        }
        writer.join().unwrap();
        assert_eq!(progress.counters().total_seen(), 20_000);
    }

    #[test]
    fn percent_rounds_against_source_count() {
        let progress = ImportProgress::new(8, PathBuf::from("x.xlsx"));
        assert_eq!(progress.progress_percent(), "0%");
        progress.mark_started();
        for _ in 0..3 {
            progress.counters().record_accepted();
        }
        assert_eq!(progress.progress_percent(), "38%");
    }

    #[test]
    fn first_finish_wins() {
        let progress = ImportProgress::new(0, PathBuf::from("x.xlsx"));
        progress.mark_started();
        assert_eq!(progress.snapshot().status, StatusCode::InProgress);
        assert_eq!(progress.elapsed_millis(), None);

        progress.finish(ImportOutcome::SinkFailed, Some("boom".into()));
        progress.finish(ImportOutcome::Completed, None);

        let snap = progress.snapshot();
        assert_eq!(snap.status, StatusCode::Finished);
        assert_eq!(snap.status.code(), 10000);
        assert_eq!(snap.outcome, Some(ImportOutcome::SinkFailed));
        assert_eq!(snap.error.as_deref(), Some("boom"));
        assert_eq!(snap.phase, ListenerPhase::DoneSinkFailed);
        assert!(snap.elapsed_millis.is_some());
        assert_eq!(snap, progress.snapshot());
    }
}
