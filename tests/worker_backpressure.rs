//! Output queue backpressure: drop policy, blocking and stall reporting.

use anyhow::Result;
use hsi_capture::{
    Frame, HsiError, QueueLimits, SessionInfo, Wait, Worker, WorkerConfig, WorkerState,
};
use hsi_core::ImageBuffer;
use hsi_driver_mock::RecordingExporter;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

fn frame(seq: u64) -> Result<Frame> {
    let raw = ImageBuffer::filled(4, 2, vec![500.0, 600.0, 700.0], 100.0)?;
    Ok(Frame::new(
        format!("live_{:03}", seq),
        SessionInfo::new("live", 1, seq),
        raw,
    ))
}

/// Poll `check` every few milliseconds until it holds or two seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    check()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn overloaded_consumer_keeps_newest_results() -> Result<()> {
    let config = WorkerConfig::sequential().with_limits(2, 3).with_can_drop(true);
    let worker = Worker::new(config)?;
    worker.start()?;

    // Producer at 100 ms per frame; the consumer only shows up after 500 ms.
    for seq in 1..=5 {
        worker.ingest_frame(frame(seq)?).await?;
        assert!(worker.queue_used() <= 3);
        sleep(Duration::from_millis(100)).await;
    }
    assert!(eventually(|| worker.stats().dropped == 2).await);
    assert_eq!(worker.queue_used(), 3);

    let mut delivered = Vec::new();
    while let Ok(result) = worker.get_next_result(Wait::Poll).await {
        delivered.push(result.frame.sequence());
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(delivered, vec![3, 4, 5]);

    let stats = worker.stats();
    assert_eq!(stats.delivered, 3);
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.stalled, 0);
    worker.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn no_drop_policy_blocks_and_loses_nothing() -> Result<()> {
    let config = WorkerConfig::sequential().with_limits(1, 2);
    let worker = Worker::new(config)?;
    worker.start()?;

    for seq in 1..=6 {
        worker.ingest_frame(frame(seq)?).await?;
    }
    assert!(eventually(|| worker.queue_used() == 2).await);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(worker.queue_used(), 2);

    let mut delivered = Vec::new();
    for _ in 0..6 {
        let result = worker.get_next_result(Wait::For(Duration::from_secs(2))).await?;
        delivered.push(result.frame.sequence());
        assert!(worker.queue_used() <= 2);
    }
    assert_eq!(delivered, (1..=6).collect::<Vec<_>>());
    assert_eq!(worker.stats().dropped, 0);
    worker.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn stalled_consumer_is_told_about_abandoned_results() -> Result<()> {
    let config = WorkerConfig {
        stall_timeout_ms: 50,
        ..WorkerConfig::sequential().with_limits(1, 1)
    };
    let worker = Worker::new(config)?;
    worker.start()?;
    worker.ingest_frame(frame(1)?).await?;
    worker.ingest_frame(frame(2)?).await?;

    assert!(eventually(|| worker.stats().stalled == 1).await);
    let err = worker.get_next_result(Wait::Poll).await.unwrap_err();
    assert!(matches!(err, HsiError::ResourceExhausted { .. }));
    // The result already queued is still delivered.
    let first = worker.get_next_result(Wait::Poll).await?;
    assert_eq!(first.frame.sequence(), 1);
    assert!(worker.get_next_result(Wait::Poll).await.unwrap_err().is_timeout());
    worker.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn lowering_limits_at_runtime() -> Result<()> {
    let worker = Worker::new(WorkerConfig::sequential().with_limits(4, 4))?;
    worker.start()?;
    for seq in 1..=4 {
        worker.ingest_frame(frame(seq)?).await?;
    }
    assert!(eventually(|| worker.queue_used() == 4).await);

    // Ordering violations are rejected and leave the limits alone.
    let bad = QueueLimits {
        soft_limit: 3,
        hard_limit: 2,
    };
    assert!(worker.set_queue_limits(bad).unwrap_err().is_configuration());
    assert_eq!(worker.queue_limits(), QueueLimits::new(4, 4)?);

    // Without drop permission the hard limit cannot go below the depth.
    let err = worker.set_queue_limits(QueueLimits::new(1, 2)?).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(worker.queue_limits(), QueueLimits::new(4, 4)?);
    assert!(worker.queue_used() <= worker.queue_limits().hard_limit);

    // With it, the oldest surplus is dropped and the depth follows the limit.
    worker.set_worker_can_drop(true);
    worker.set_queue_limits(QueueLimits::new(1, 2)?)?;
    assert_eq!(worker.queue_limits(), QueueLimits::new(1, 2)?);
    assert_eq!(worker.queue_used(), 2);
    assert!(worker.queue_used() <= worker.queue_limits().hard_limit);
    assert_eq!(worker.stats().dropped, 2);

    let next = worker.get_next_result(Wait::Poll).await?;
    assert_eq!(next.frame.sequence(), 3);
    worker.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn blocking_queue_shrinks_only_after_consumer_catches_up() -> Result<()> {
    let worker = Worker::new(WorkerConfig::sequential().with_limits(4, 4))?;
    worker.start()?;
    for seq in 1..=4 {
        worker.ingest_frame(frame(seq)?).await?;
        assert!(worker.queue_used() <= worker.queue_limits().hard_limit);
    }
    assert!(eventually(|| worker.queue_used() == 4).await);

    let target = QueueLimits::new(1, 2)?;
    let mut delivered = Vec::new();
    while worker.set_queue_limits(target).is_err() {
        assert!(worker.queue_used() <= worker.queue_limits().hard_limit);
        delivered.push(worker.get_next_result(Wait::Poll).await?.frame.sequence());
    }
    assert_eq!(delivered, vec![1, 2]);
    assert_eq!(worker.queue_limits(), target);

    // New results now block at the lowered limit instead of overshooting it.
    worker.ingest_frame(frame(5)?).await?;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(worker.queue_used(), 2);
    assert!(worker.queue_used() <= worker.queue_limits().hard_limit);
    assert_eq!(worker.stats().dropped, 0);
    for want in 3..=5 {
        assert_eq!(worker.get_next_result(Wait::For(Duration::from_secs(2))).await?.frame.sequence(), want);
    }
    worker.stop().await?;
    Ok(())
}

#[tokio::test]
async fn get_next_result_waits_for_a_result() -> Result<()> {
    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.start()?;
    let started = Instant::now();
    let err = worker
        .get_next_result(Wait::For(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(50));

    worker.ingest_frame(frame(7)?).await?;
    let result = timeout(
        Duration::from_secs(2),
        worker.get_next_result(Wait::Infinite),
    )
    .await??;
    assert_eq!(result.frame.sequence(), 7);
    Ok(())
}

/// One frame stuck in export, ten more filling the intake.
async fn jammed_worker(stall_timeout_ms: u64) -> Result<Worker> {
    let config = WorkerConfig {
        stall_timeout_ms,
        shutdown_timeout_ms: 100,
        ..WorkerConfig::sequential()
    };
    let worker = Worker::new(config)?;
    let exporter = RecordingExporter::new().with_delay(Duration::from_secs(60));
    worker.set_exporter(Some(Arc::new(exporter)));
    worker.start()?;
    worker.ingest_frame(frame(1)?).await?;
    sleep(Duration::from_millis(50)).await;
    for seq in 2..=11 {
        worker.ingest_frame(frame(seq)?).await?;
    }
    Ok(worker)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_intake_refuses_frame_after_stall_timeout() -> Result<()> {
    let worker = jammed_worker(100).await?;

    let started = Instant::now();
    let err = timeout(Duration::from_secs(2), worker.ingest_frame(frame(12)?))
        .await?
        .unwrap_err();
    assert!(
        matches!(err, HsiError::ResourceExhausted { ref resource, .. } if resource == "worker_intake"),
        "{}",
        err
    );
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(worker.stats().ingested, 11);

    // The exporter never finishes, so the drain is cut short.
    assert!(worker.stop().await.is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_releases_an_ingest_waiting_on_full_intake() -> Result<()> {
    let worker = jammed_worker(60_000).await?;

    let late = frame(12)?;
    let (ingested, stopped) = timeout(Duration::from_secs(2), async {
        tokio::join!(worker.ingest_frame(late), async {
            sleep(Duration::from_millis(50)).await;
            worker.stop().await
        })
    })
    .await?;

    assert!(ingested.unwrap_err().is_configuration());
    assert!(stopped.is_err());
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert_eq!(worker.stats().ingested, 11);
    Ok(())
}
