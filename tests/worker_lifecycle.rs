//! Worker start/stop/reset, in-band failures and callback delivery.

use anyhow::Result;
use hsi_capture::{
    Frame, HsiError, SessionInfo, Wait, Worker, WorkerConfig, WorkerResult, WorkerState,
};
use hsi_core::ImageBuffer;
use hsi_driver_mock::RecordingExporter;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const WAIT: Wait = Wait::For(Duration::from_secs(2));

fn frame(seq: u64) -> Result<Frame> {
    let raw = ImageBuffer::filled(2, 2, vec![500.0, 650.0], seq as f32)?;
    Ok(Frame::new(
        format!("f{}", seq),
        SessionInfo::new("life", 1, seq),
        raw,
    ))
}

#[tokio::test]
async fn failed_export_is_delivered_in_band() -> Result<()> {
    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.set_exporter(Some(Arc::new(RecordingExporter::new().failing_on(2))));
    worker.start()?;
    for seq in 1..=3 {
        worker.ingest_frame(frame(seq)?).await?;
    }

    assert_eq!(worker.get_next_result(WAIT).await?.frame.sequence(), 1);
    let err = worker.get_next_result(WAIT).await.unwrap_err();
    assert!(matches!(err, HsiError::Io(_)));
    assert_eq!(worker.get_next_result(WAIT).await?.frame.sequence(), 3);

    let stats = worker.stats();
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.delivered, 2);
    worker.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_drains_accepted_frames_and_flushes() -> Result<()> {
    let exporter = Arc::new(RecordingExporter::new().with_delay(Duration::from_millis(10)));
    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.set_exporter(Some(exporter.clone()));
    worker.start()?;
    for seq in 1..=5 {
        worker.ingest_frame(frame(seq)?).await?;
    }
    worker.stop().await?;

    assert_eq!(worker.state(), WorkerState::Stopped);
    assert_eq!(exporter.sequences(), vec![1, 2, 3, 4, 5]);
    assert!(exporter.was_flushed());
    // Results produced while draining are still readable.
    assert_eq!(worker.queue_used(), 5);
    assert!(worker.ingest_frame(frame(6)?).await.unwrap_err().is_configuration());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drain_is_bounded_by_shutdown_timeout() -> Result<()> {
    let config = WorkerConfig {
        shutdown_timeout_ms: 50,
        ..WorkerConfig::sequential()
    };
    let worker = Worker::new(config)?;
    worker.set_exporter(Some(Arc::new(
        RecordingExporter::new().with_delay(Duration::from_millis(500)),
    )));
    worker.start()?;
    worker.ingest_frame(frame(1)?).await?;
    sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    let err = worker.stop().await.unwrap_err();
    assert!(matches!(err, HsiError::ShutdownFailed(_)));
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(worker.state(), WorkerState::Stopped);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reset_discards_results_and_allows_restart() -> Result<()> {
    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.start()?;
    for seq in 1..=3 {
        worker.ingest_frame(frame(seq)?).await?;
    }
    sleep(Duration::from_millis(50)).await;
    worker.reset().await?;
    assert!(!worker.has_next_result());
    assert_eq!(worker.state(), WorkerState::Unconfigured);

    // Sequence tracking starts over, so low numbers are accepted again.
    worker.start()?;
    worker.ingest_frame(frame(1)?).await?;
    assert_eq!(worker.get_next_result(WAIT).await?.frame.sequence(), 1);
    worker.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_workers_deliver_every_frame() -> Result<()> {
    let worker = Worker::new(WorkerConfig::default().with_worker_count(4))?;
    worker.start()?;
    for seq in 1..=20 {
        worker.ingest_frame(frame(seq)?).await?;
    }
    let mut seen = BTreeSet::new();
    for _ in 0..20 {
        seen.insert(worker.get_next_result(WAIT).await?.frame.sequence());
    }
    assert_eq!(seen, (1..=20).collect::<BTreeSet<u64>>());
    worker.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn callback_receives_results_in_order() -> Result<()> {
    let received: Arc<Mutex<Vec<u64>>> = Arc::default();
    let worker = Worker::new(WorkerConfig::sequential())?;
    {
        let received = Arc::clone(&received);
        worker.register_callback(
            move |result: Result<WorkerResult, HsiError>| {
                if let Ok(result) = result {
                    received.lock().push(result.frame.sequence());
                }
            },
            1,
        )?;
    }
    worker.start()?;
    for seq in 1..=5 {
        worker.ingest_frame(frame(seq)?).await?;
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    while received.lock().len() < 5 && Instant::now() < deadline {
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(*received.lock(), vec![1, 2, 3, 4, 5]);
    assert!(!worker.has_next_result());

    // Without a callback, results stay queued for polling.
    worker.reset_callback();
    worker.ingest_frame(frame(6)?).await?;
    assert_eq!(worker.get_next_result(WAIT).await?.frame.sequence(), 6);
    assert_eq!(received.lock().len(), 5);
    worker.stop().await?;
    Ok(())
}
