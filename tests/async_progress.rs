mod common;

use common::{options_in, people, Person, Recorder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use xlsx_ingest::{
    ImportController, ImportFile, ImportHooks, ImportOutcome, ListenerPhase, StatusCode,
    VecRowSource,
};

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn observers_see_progress_while_the_sink_blocks() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let gate = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let hooks = {
        let gate = Arc::clone(&gate);
        let calls = Arc::clone(&calls);
        ImportHooks::new(move |_batch: Vec<Person>| {
            let gate = Arc::clone(&gate);
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call == 1 {
                    gate.notified().await;
                }
                Ok(())
            }
        })
    };
    let controller = ImportController::new(
        ImportFile::named("people.xlsx", VecRowSource::new(people(6))),
        hooks,
        options_in(dir.path()).batch_size(3).expected_rows(6),
    )?
    .with_csv_rejected_writer();

    assert!(!controller.is_finished());
    let handle = controller.start_import_async();

    wait_until(|| calls.load(Ordering::SeqCst) == 1).await;
    let snap = controller.snapshot();
    assert_eq!(snap.status, StatusCode::InProgress);
    assert_eq!(snap.status.code(), 10001);
    assert_eq!(snap.phase, ListenerPhase::Flushing);
    assert_eq!((snap.success_count, snap.total_count), (3, 3));
    assert_eq!(snap.progress, "50%");
    assert_eq!(snap.elapsed_millis, None);
    assert_eq!(snap, controller.snapshot());

    gate.notify_one();
    handle.await?;

    let snap = controller.snapshot();
    assert!(controller.is_finished());
    assert_eq!(snap.status, StatusCode::Finished);
    assert_eq!(snap.outcome, Some(ImportOutcome::Completed));
    assert_eq!(snap.phase, ListenerPhase::Done);
    assert_eq!(snap.progress, "100%");
    assert!(controller.elapsed_millis().is_some());
    assert!(controller.fail_file_path().exists());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_reads_always_balance() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let rec = Recorder::<Person>::new();
    let mut rows = people(0);
    for i in 0..5_000 {
        let age = if i % 7 == 0 { String::from("?") } else { i.to_string() };
        rows.push(vec![format!("p{i}"), age, format!("p{i}@x")]);
    }
    let controller = ImportController::new(
        ImportFile::named("people.xlsx", VecRowSource::new(rows)),
        rec.hooks(),
        options_in(dir.path()).batch_size(64),
    )?
    .with_csv_rejected_writer();

    let progress = controller.progress();
    let observer = tokio::spawn(async move {
        let mut reads = 0u32;
        while !progress.is_finished() {
            let counts = progress.counters().snapshot();
            assert_eq!(counts.accepted + counts.rejected, counts.total_seen);
            reads += 1;
            tokio::task::yield_now().await;
        }
        reads
    });

    controller.start_import_async().await?;
    observer.await?;

    let snap = controller.snapshot();
    assert_eq!(snap.total_count, 5_000);
    assert_eq!(snap.fail_count, 715);
    Ok(())
}

#[tokio::test]
async fn async_sink_failure_lands_in_the_snapshot() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let rec = Recorder::<Person>::new();
    let controller = ImportController::new(
        ImportFile::named("people.xlsx", VecRowSource::new(people(4))),
        rec.hooks_failing_on(Some(1)),
        options_in(dir.path()).batch_size(2),
    )?
    .with_csv_rejected_writer();

    controller.start_import_async().await?;

    let snap = controller.snapshot();
    assert_eq!(snap.status, StatusCode::Finished);
    assert_eq!(snap.outcome, Some(ImportOutcome::SinkFailed));
    assert_eq!(snap.phase, ListenerPhase::DoneSinkFailed);
    assert!(snap.error.as_deref().unwrap_or_default().contains("batch 1"));
    assert_eq!(snap.success_count, 2);
    Ok(())
}

#[tokio::test]
async fn async_entry_errors_finish_as_failed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let rec = Recorder::<Person>::new();
    let controller = ImportController::new(
        ImportFile::named("people.ods", VecRowSource::new(people(1))),
        rec.hooks(),
        options_in(dir.path()),
    )?;

    controller.start_import_async().await?;

    let snap = controller.snapshot();
    assert_eq!(snap.status, StatusCode::Finished);
    assert_eq!(snap.outcome, Some(ImportOutcome::Failed));
    assert!(snap.error.unwrap().contains("people.ods"));
    assert!(rec.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn second_async_start_leaves_the_first_import_alone() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let rec = Recorder::<Person>::new();
    let controller = ImportController::new(
        ImportFile::named("people.xlsx", VecRowSource::new(people(3))),
        rec.hooks(),
        options_in(dir.path()),
    )?
    .with_csv_rejected_writer();

    let first = controller.start_import_async();
    let second = controller.start_import_async();
    second.await?;
    first.await?;

    let snap = controller.snapshot();
    assert_eq!(snap.outcome, Some(ImportOutcome::Completed));
    assert_eq!(snap.success_count, 3);
    Ok(())
}
