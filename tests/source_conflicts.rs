//! A worker reads from exactly one source at a time.

use anyhow::Result;
use hsi_capture::{
    AcquisitionConfig, AcquisitionContext, Frame, SessionInfo, Wait, Worker, WorkerConfig,
};
use hsi_core::ImageBuffer;
use hsi_driver_mock::{synthetic_session, MockCamera};
use std::sync::Arc;
use std::time::Duration;

async fn live_source() -> Result<Arc<AcquisitionContext>> {
    let camera = Arc::new(MockCamera::new(4, 2, 3));
    Ok(Arc::new(
        AcquisitionContext::open(camera, None, AcquisitionConfig::default()).await?,
    ))
}

fn manual_frame(seq: u64) -> Result<Frame> {
    let raw = ImageBuffer::filled(2, 2, vec![550.0], 1.0)?;
    Ok(Frame::new("manual", SessionInfo::new("manual", 1, seq), raw))
}

#[tokio::test]
async fn session_rejected_while_acquisition_attached() -> Result<()> {
    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.set_acquisition_context(Some(live_source().await?))?;

    let err = worker
        .set_session(Some(synthetic_session("s", 3, &[])), false)
        .unwrap_err();
    assert!(err.is_configuration());
    // Prior configuration unchanged: still no session.
    assert_eq!(worker.query_session_progress().frames_total, 0);
    assert!(worker.wait_session_done().await.unwrap_err().is_configuration());

    // Detaching first makes room.
    worker.set_acquisition_context(None)?;
    worker.set_session(Some(synthetic_session("s", 3, &[])), false)?;
    assert_eq!(worker.query_session_progress().frames_total, 3);
    Ok(())
}

#[tokio::test]
async fn acquisition_rejected_while_session_attached() -> Result<()> {
    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.set_session(Some(synthetic_session("s", 3, &[])), false)?;

    let err = worker
        .set_acquisition_context(Some(live_source().await?))
        .unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(worker.query_session_progress().frames_total, 3);

    // A second session is a conflict too.
    assert!(worker
        .set_session(Some(synthetic_session("t", 1, &[])), false)
        .unwrap_err()
        .is_configuration());
    Ok(())
}

#[tokio::test]
async fn manual_ingest_rejected_while_source_attached() -> Result<()> {
    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.set_acquisition_context(Some(live_source().await?))?;
    assert!(worker
        .ingest_frame(manual_frame(1)?)
        .await
        .unwrap_err()
        .is_configuration());

    worker.set_acquisition_context(None)?;
    worker.start()?;
    worker.ingest_frame(manual_frame(1)?).await?;
    let result = worker
        .get_next_result(Wait::For(Duration::from_secs(2)))
        .await?;
    assert_eq!(result.frame.name, "manual");
    worker.stop().await?;
    Ok(())
}

#[tokio::test]
async fn live_frames_flow_from_camera_to_result() -> Result<()> {
    let ctx = live_source().await?;
    ctx.set_session_info(SessionInfo::new("run", 3, 1));

    let worker = Worker::new(WorkerConfig::sequential())?;
    worker.set_acquisition_context(Some(Arc::clone(&ctx)))?;
    worker.start()?;
    ctx.set_fps(50.0).await?;
    ctx.set_continuous(true).await?;

    let mut last = 0;
    for _ in 0..3 {
        let result = worker
            .get_next_result(Wait::For(Duration::from_secs(2)))
            .await?;
        assert_eq!(result.frame.session.name, "run");
        assert_eq!(result.frame.session.session_number, 3);
        assert!(result.frame.sequence() > last);
        last = result.frame.sequence();
    }
    ctx.set_continuous(false).await?;
    worker.stop().await?;
    assert!(ctx.stats().frames_produced >= 3);
    Ok(())
}
