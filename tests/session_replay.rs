//! Replaying recorded sessions through the worker.

use anyhow::Result;
use hsi_capture::{
    ProcessingMode, ProcessingPipeline, ProcessingSource, ReferenceKind, SessionFile, Wait,
    Worker, WorkerConfig, WorkerState,
};
use hsi_core::{RecordedSession, CUBE_BUFFER};
use hsi_driver_mock::{synthetic_session, BandMeanViewer, RecordingExporter};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Wait = Wait::For(Duration::from_secs(2));

async fn drain(worker: &Worker, n: usize) -> Result<Vec<u64>> {
    let mut sequences = Vec::with_capacity(n);
    for _ in 0..n {
        sequences.push(worker.get_next_result(WAIT).await?.frame.sequence());
    }
    Ok(sequences)
}

#[tokio::test]
async fn progress_is_monotonic_and_completes() -> Result<()> {
    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.set_session(Some(synthetic_session("replay", 5, &[])), false)?;

    let before = worker.query_session_progress();
    assert!(before.in_progress);
    assert_eq!((before.frames_read, before.frames_total), (0, 5));

    worker.start()?;
    let mut last_read = 0;
    for _ in 0..5 {
        worker.get_next_result(WAIT).await?;
        let progress = worker.query_session_progress();
        assert!(progress.frames_read >= last_read);
        last_read = progress.frames_read;
    }
    assert_eq!(worker.wait_session_done().await?, 5);

    let after = worker.query_session_progress();
    assert!(!after.in_progress);
    assert_eq!(after.frames_read, after.frames_total);
    worker.stop().await?;
    Ok(())
}

#[tokio::test]
async fn dropped_frames_replay_as_placeholders_unless_skipped() -> Result<()> {
    let session = synthetic_session("gappy", 5, &[1, 3]);

    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.set_session(Some(session.clone()), false)?;
    worker.start()?;
    let mut placeholders = 0;
    for _ in 0..5 {
        let result = worker.get_next_result(WAIT).await?;
        if result.frame.is_dropped() {
            placeholders += 1;
        }
    }
    assert_eq!(placeholders, 2);
    worker.stop().await?;

    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.set_session(Some(session), true)?;
    assert_eq!(worker.query_session_progress().frames_total, 3);
    worker.start()?;
    assert_eq!(drain(&worker, 3).await?, vec![1, 3, 5]);
    worker.stop().await?;
    Ok(())
}

#[tokio::test]
async fn exhausted_session_requires_reset() -> Result<()> {
    let session = synthetic_session("short", 2, &[]);
    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.set_session(Some(session.clone()), false)?;
    worker.start()?;
    drain(&worker, 2).await?;
    worker.wait_session_done().await?;

    let frame = session.measurement(0, hsi_core::SessionItemType::AllFrames)?;
    let err = worker.ingest_frame(frame.clone()).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(worker
        .set_session(Some(synthetic_session("next", 1, &[])), false)
        .unwrap_err()
        .is_configuration());
    assert!(worker.set_session(None, false).unwrap_err().is_configuration());

    worker.reset().await?;
    assert_eq!(worker.state(), WorkerState::Unconfigured);
    assert_eq!(worker.query_session_progress().frames_total, 0);

    // Same session again from the start.
    worker.set_session(Some(session), false)?;
    worker.start()?;
    assert_eq!(drain(&worker, 2).await?, vec![1, 2]);
    worker.stop().await?;
    Ok(())
}

#[tokio::test]
async fn session_references_drive_reflectance() -> Result<()> {
    let session = synthetic_session("refl", 3, &[]);
    let pipeline = ProcessingPipeline::new(ProcessingSource::Session(session.clone()))?;
    assert!(pipeline.has_reference(ReferenceKind::Dark));
    assert!(pipeline.has_reference(ReferenceKind::White));
    pipeline.set_processing_mode(ProcessingMode::Reflectance);

    let exporter = Arc::new(RecordingExporter::new());
    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.set_processing_context(Some(Arc::new(pipeline)));
    worker.set_exporter(Some(exporter.clone()));
    worker.set_viewer(Some(Arc::new(BandMeanViewer)));
    worker.set_session(Some(session), false)?;
    worker.start()?;

    for seq in 1..=3 {
        let result = worker.get_next_result(WAIT).await?;
        assert_eq!(result.frame.sequence(), seq);
        assert_eq!(result.frame.processing_mode, ProcessingMode::Reflectance);
        let cube = result.frame.buffer(CUBE_BUFFER).expect("cube");
        assert_eq!((cube.width, cube.height, cube.channels), (4, 2, 3));
        let view = result.view.expect("view");
        assert_eq!(view.sequence, seq);
        assert_eq!(view.pixels.len(), 8);
    }
    worker.stop().await?;
    assert_eq!(exporter.sequences(), vec![1, 2, 3]);
    assert!(exporter.was_flushed());
    Ok(())
}

#[tokio::test]
async fn session_round_trips_through_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("recorded.json");
    synthetic_session("disk", 3, &[2]).save(&path)?;

    let loaded: Arc<dyn SessionFile> = RecordedSession::load(&path)?;
    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.set_session(Some(loaded), true)?;
    worker.start()?;
    assert_eq!(drain(&worker, 2).await?, vec![1, 2]);
    assert_eq!(worker.wait_session_done().await?, 2);
    worker.stop().await?;
    Ok(())
}
