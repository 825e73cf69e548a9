//! Frame worker: source → pipeline → sinks → output queue.
//!
//! A [`Worker`] owns one frame pipeline:
//!
//! ```text
//! source ──feeder──► intake ──► N processors ──► output queue ──► application
//!                                 │
//!                                 ├─ ProcessingPipeline::apply
//!                                 ├─ ExportSink::apply
//!                                 └─ ViewSink::apply
//! ```
//!
//! The source is exactly one of: a live [`AcquisitionContext`], a replayed
//! session, or frames pushed with [`Worker::ingest_frame`]. The feeder polls
//! the source every `poll_interval` when nothing is available. Frames whose
//! sequence number goes backwards within a session are discarded unless
//! `keep_out_of_sequence` is set. With one processor, results leave in
//! intake order; with more, order is best effort.
//!
//! # State machine
//!
//! ```text
//! Unconfigured ──attach pipeline──► Configured ──start──► Running
//!      │                                                   ▲  │ stop
//!      └──────────────start (pass-through)─────────────────┘  ▼
//!                        reset ◄── Stopped ◄──────────── Draining
//! ```
//!
//! Starting without a pipeline is allowed: frames then pass through to the
//! sinks and the output queue unprocessed, and the state stays Running even
//! if a pipeline is attached later. `start` from Stopped runs again on the
//! same source; `reset` is only needed to switch sources.
//!
//! Two backpressure points are visible to the caller: a full output queue
//! (`queue_used`) means the application is behind the worker; a full
//! acquisition ingest stage means the worker is behind the hardware.

mod callback;
pub mod config;
mod output;
mod source;

pub use callback::ResultCallback;
pub use config::{QueueLimits, WorkerConfig};
pub use output::WorkerResult;
pub use source::SessionProgress;

use crate::acquisition::AcquisitionContext;
use futures::future::join_all;
use hsi_core::limits::DEFAULT_INGEST_QUEUE;
use hsi_core::{
    ExportSink, Frame, HsiError, HsiResult, ProcessingPipeline, SessionFile, ViewSink, Wait,
};
use output::{Entry, OutputQueue};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use source::{SessionCursor, Source};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Lifecycle of a [`Worker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// No processing pipeline attached.
    Unconfigured,
    /// Pipeline attached, not running.
    Configured,
    Running,
    /// Finishing frames already taken in; no new intake.
    Draining,
    Stopped,
}

/// Counters since the worker was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Frames accepted into the intake
    pub ingested: u64,
    /// Results handed to the application
    pub delivered: u64,
    /// Results evicted by the drop policy
    pub dropped: u64,
    /// Frames discarded for a non-monotonic sequence number
    pub out_of_sequence: u64,
    /// Results abandoned because the consumer stalled
    pub stalled: u64,
    /// Frames that failed processing, export or view
    pub failures: u64,
    pub queue_used: usize,
}

type Intake = HsiResult<Frame>;

#[derive(Default, Clone)]
struct Collaborators {
    pipeline: Option<Arc<ProcessingPipeline>>,
    exporter: Option<Arc<dyn ExportSink>>,
    viewer: Option<Arc<dyn ViewSink>>,
}

struct Shared {
    config: WorkerConfig,
    state: RwLock<WorkerState>,
    collaborators: RwLock<Collaborators>,
    source: RwLock<Source>,
    output: Arc<OutputQueue>,
    last_sequence: Mutex<HashMap<(String, u32), u64>>,
    intake_tx: mpsc::Sender<Intake>,
    intake_rx: tokio::sync::Mutex<mpsc::Receiver<Intake>>,
    ingested: AtomicU64,
    out_of_sequence: AtomicU64,
    failures: AtomicU64,
}

#[derive(Default)]
struct Runtime {
    feeder: Option<JoinHandle<()>>,
    processors: Vec<JoinHandle<()>>,
    draining: Option<watch::Sender<bool>>,
    callback: Option<JoinHandle<()>>,
}

impl Shared {
    fn state(&self) -> WorkerState {
        *self.state.read()
    }

    fn set_state(&self, next: WorkerState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            info!(?previous, current = ?next, "Worker state changed");
        }
    }

    /// Sequence filter. `None` means the frame is discarded.
    fn admit(&self, intake: Intake) -> Option<Intake> {
        let Ok(frame) = &intake else {
            return Some(intake);
        };
        // Sequence 0 marks a frame that was never stamped.
        if self.config.keep_out_of_sequence || frame.sequence() == 0 {
            return Some(intake);
        }
        let key = (frame.session.name.clone(), frame.session.session_number);
        let mut last = self.last_sequence.lock();
        match last.get(&key) {
            Some(&previous) if frame.sequence() <= previous => {
                let discarded = self.out_of_sequence.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    frame = %frame.name,
                    sequence = frame.sequence(),
                    previous,
                    discarded,
                    "Out-of-sequence frame discarded"
                );
                None
            }
            _ => {
                last.insert(key, frame.sequence());
                Some(intake)
            }
        }
    }

    async fn enqueue(&self, intake: Intake) -> bool {
        let Some(intake) = self.admit(intake) else {
            return true;
        };
        if self.intake_tx.send(intake).await.is_err() {
            return false;
        }
        self.ingested.fetch_add(1, Ordering::Relaxed);
        true
    }

    async fn run_collaborators(&self, mut frame: Frame) -> HsiResult<output::WorkerResult> {
        // Placeholders for dropped frames carry no data to process.
        if frame.is_dropped() {
            return Ok(output::WorkerResult { frame, view: None });
        }
        let collaborators = self.collaborators.read().clone();
        if let Some(pipeline) = &collaborators.pipeline {
            pipeline.apply(&mut frame)?;
        }
        if let Some(exporter) = &collaborators.exporter {
            exporter.apply(&frame).await?;
        }
        let view = match &collaborators.viewer {
            Some(viewer) => Some(viewer.apply(&frame).await?),
            None => None,
        };
        Ok(output::WorkerResult { frame, view })
    }

    async fn handle(&self, intake: Intake) -> Entry {
        let (name, result) = match intake {
            Ok(frame) => {
                let name = frame.name.clone();
                debug!(frame = %name, sequence = frame.sequence(), "Processing frame");
                (name, self.run_collaborators(frame).await)
            }
            Err(e) => ("<source>".to_string(), Err(e)),
        };
        if let Err(e) = &result {
            self.failures.fetch_add(1, Ordering::Relaxed);
            error!(frame = %name, error = %e, "Frame failed");
        }
        result
    }
}

async fn feed(shared: Arc<Shared>, mut draining: watch::Receiver<bool>) {
    let poll = shared.config.poll_interval();
    loop {
        if *draining.borrow() {
            break;
        }
        let source = shared.source.read().clone();
        match source.poll_next() {
            Some(intake) => {
                if !shared.enqueue(intake).await {
                    break;
                }
            }
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    _ = draining.wait_for(|d| *d) => break,
                }
            }
        }
    }
    debug!("Feeder stopped");
}

async fn process(shared: Arc<Shared>, index: usize, mut draining: watch::Receiver<bool>) {
    loop {
        let intake = {
            let mut rx = shared.intake_rx.lock().await;
            tokio::select! {
                biased;
                item = rx.recv() => item,
                _ = draining.wait_for(|d| *d) => rx.try_recv().ok(),
            }
        };
        let Some(intake) = intake else {
            break;
        };
        let entry = shared.handle(intake).await;
        shared.output.push(entry).await;
    }
    debug!(processor = index, "Processor stopped");
}

/// Orchestrates one producer-to-consumer frame pipeline.
pub struct Worker {
    id: Uuid,
    span: Span,
    shared: Arc<Shared>,
    runtime: Mutex<Runtime>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> HsiResult<Self> {
        config.validate()?;
        let id = Uuid::new_v4();
        let span = info_span!("worker", id = %id);
        let (intake_tx, intake_rx) = mpsc::channel(DEFAULT_INGEST_QUEUE);
        let output = Arc::new(OutputQueue::new(
            config.limits(),
            config.can_drop,
            config.stall_timeout(),
        ));
        span.in_scope(|| {
            info!(
                workers = config.worker_count,
                hard_limit = config.hard_limit,
                soft_limit = config.soft_limit,
                can_drop = config.can_drop,
                "Worker created"
            )
        });
        Ok(Self {
            id,
            span,
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(WorkerState::Unconfigured),
                collaborators: RwLock::new(Collaborators::default()),
                source: RwLock::new(Source::None),
                output,
                last_sequence: Mutex::new(HashMap::new()),
                intake_tx,
                intake_rx: tokio::sync::Mutex::new(intake_rx),
                ingested: AtomicU64::new(0),
                out_of_sequence: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
            runtime: Mutex::new(Runtime::default()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    // -------------------------------------------------------------------------
    // Sources
    // -------------------------------------------------------------------------

    /// Reject a source change that conflicts with the current source.
    fn check_source_change(&self, current: &Source, attaching: Option<&'static str>) -> HsiResult<()> {
        if let Source::Session(cursor) = current {
            if cursor.is_exhausted() {
                return Err(HsiError::Configuration(format!(
                    "Session '{}' is exhausted; reset the worker before reconfiguring",
                    cursor.name()
                )));
            }
        }
        match (current, attaching) {
            (_, None) | (Source::None, Some(_)) => Ok(()),
            (Source::Acquisition(_), Some("acquisition")) => Ok(()),
            (current, Some(kind)) => Err(HsiError::Configuration(format!(
                "Cannot attach {} source while {} source is in progress",
                kind,
                current.label()
            ))),
        }
    }

    /// Attach or detach (`None`) a live acquisition source.
    pub fn set_acquisition_context(&self, context: Option<Arc<AcquisitionContext>>) -> HsiResult<()> {
        let mut source = self.shared.source.write();
        self.check_source_change(&source, context.as_ref().map(|_| "acquisition"))?;
        *source = match context {
            Some(ctx) => {
                self.span.in_scope(|| info!(product = ctx.product_name(), "Acquisition source attached"));
                Source::Acquisition(ctx)
            }
            None => Source::None,
        };
        Ok(())
    }

    /// Attach or detach (`None`) a session to replay.
    ///
    /// With `skip_dropped_frames`, placeholders for frames lost during
    /// recording are not replayed.
    pub fn set_session(
        &self,
        session: Option<Arc<dyn SessionFile>>,
        skip_dropped_frames: bool,
    ) -> HsiResult<()> {
        let mut source = self.shared.source.write();
        self.check_source_change(&source, session.as_ref().map(|_| "session"))?;
        *source = match session {
            Some(file) => {
                let cursor = SessionCursor::new(file, skip_dropped_frames);
                self.span.in_scope(|| {
                    info!(
                        session = cursor.name(),
                        frames = cursor.progress().frames_total,
                        skip_dropped_frames,
                        "Session source attached"
                    )
                });
                Source::Session(Arc::new(cursor))
            }
            None => Source::None,
        };
        Ok(())
    }

    pub fn query_session_progress(&self) -> SessionProgress {
        match &*self.shared.source.read() {
            Source::Session(cursor) => cursor.progress(),
            _ => SessionProgress::default(),
        }
    }

    /// Resolve once the attached session is exhausted, with the number of
    /// frames read.
    pub async fn wait_session_done(&self) -> HsiResult<usize> {
        let cursor = match &*self.shared.source.read() {
            Source::Session(cursor) => Arc::clone(cursor),
            _ => {
                return Err(HsiError::Configuration(
                    "No session source attached".into(),
                ))
            }
        };
        Ok(cursor.wait_done().await)
    }

    /// Push a frame into the worker by hand.
    ///
    /// Rejected while another source is attached, after an attached session
    /// is exhausted, and once the worker is draining or stopped. While
    /// running, a full intake is waited on for at most the stall timeout.
    pub async fn ingest_frame(&self, frame: Frame) -> HsiResult<()> {
        let state = self.state();
        if matches!(state, WorkerState::Draining | WorkerState::Stopped) {
            return Err(HsiError::Configuration(format!(
                "Cannot ingest frame '{}' while worker is {:?}",
                frame.name, state
            )));
        }
        {
            let source = self.shared.source.read();
            match &*source {
                Source::None => {}
                Source::Session(cursor) if cursor.is_exhausted() => {
                    return Err(HsiError::Configuration(format!(
                        "Session '{}' is exhausted; reset the worker before ingesting",
                        cursor.name()
                    )));
                }
                other => {
                    return Err(HsiError::Configuration(format!(
                        "Cannot ingest frames while {} source is attached",
                        other.label()
                    )));
                }
            }
        }

        if state == WorkerState::Running {
            return self.ingest_running(frame).await;
        }
        // Not running: nothing drains the intake, so never wait on it.
        let Some(intake) = self.shared.admit(Ok(frame)) else {
            return Ok(());
        };
        self.shared.intake_tx.try_send(intake).map_err(|_| {
            HsiError::exhausted(
                "worker_intake",
                format!("{} frames waiting for start()", DEFAULT_INGEST_QUEUE),
            )
        })?;
        self.shared.ingested.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Wait for intake room, giving up once the worker drains or the stall
    /// timeout passes.
    async fn ingest_running(&self, frame: Frame) -> HsiResult<()> {
        let draining = self.runtime.lock().draining.as_ref().map(watch::Sender::subscribe);
        let Some(mut draining) = draining else {
            return Err(HsiError::Configuration(format!(
                "Cannot ingest frame '{}': worker stopped",
                frame.name
            )));
        };
        let name = frame.name.clone();
        let Some(intake) = self.shared.admit(Ok(frame)) else {
            return Ok(());
        };
        let stall = self.shared.config.stall_timeout();
        tokio::select! {
            sent = self.shared.intake_tx.send(intake) => {
                sent.map_err(|_| HsiError::Configuration("Worker intake closed".into()))?;
            }
            _ = draining.wait_for(|d| *d) => {
                return Err(HsiError::Configuration(format!(
                    "Worker stopped before frame '{}' was taken in",
                    name
                )));
            }
            _ = tokio::time::sleep(stall) => {
                warn!(frame = %name, stall_timeout_ms = stall.as_millis() as u64, "Intake full, frame refused");
                return Err(HsiError::exhausted(
                    "worker_intake",
                    format!("no room for frame '{}' within {} ms", name, stall.as_millis()),
                ));
            }
        }
        self.shared.ingested.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Collaborators
    // -------------------------------------------------------------------------

    /// Attach or detach the processing pipeline. Without one, frames pass
    /// through unprocessed.
    pub fn set_processing_context(&self, pipeline: Option<Arc<ProcessingPipeline>>) {
        let attached = pipeline.is_some();
        self.shared.collaborators.write().pipeline = pipeline;
        match (self.state(), attached) {
            (WorkerState::Unconfigured, true) => self.shared.set_state(WorkerState::Configured),
            (WorkerState::Configured, false) => self.shared.set_state(WorkerState::Unconfigured),
            _ => {}
        }
    }

    pub fn set_exporter(&self, exporter: Option<Arc<dyn ExportSink>>) {
        self.shared.collaborators.write().exporter = exporter;
    }

    pub fn set_viewer(&self, viewer: Option<Arc<dyn ViewSink>>) {
        self.shared.collaborators.write().viewer = viewer;
    }

    // -------------------------------------------------------------------------
    // Output
    // -------------------------------------------------------------------------

    /// Whether a result (or a pending error) is ready.
    pub fn has_next_result(&self) -> bool {
        !self.shared.output.is_empty()
    }

    /// Pop the oldest result, waiting up to `wait`.
    ///
    /// A frame that failed processing, export or view comes back as its
    /// error. An elapsed wait is [`HsiError::Timeout`].
    pub async fn get_next_result(&self, wait: Wait) -> HsiResult<WorkerResult> {
        match self.shared.output.pop(wait).await {
            Some(entry) => entry,
            None => Err(HsiError::timeout("get_next_result", wait)),
        }
    }

    pub fn set_queue_limits(&self, limits: QueueLimits) -> HsiResult<()> {
        self.shared.output.set_limits(limits)?;
        self.span.in_scope(|| {
            info!(
                soft_limit = limits.soft_limit,
                hard_limit = limits.hard_limit,
                "Queue limits changed"
            )
        });
        Ok(())
    }

    pub fn queue_limits(&self) -> QueueLimits {
        self.shared.output.limits()
    }

    pub fn queue_used(&self) -> usize {
        self.shared.output.len()
    }

    pub fn set_worker_can_drop(&self, can_drop: bool) {
        self.shared.output.set_can_drop(can_drop);
    }

    pub fn worker_can_drop(&self) -> bool {
        self.shared.output.can_drop()
    }

    /// Deliver results to `callback` instead of `get_next_result`, with at
    /// most `concurrency` calls in flight. Replaces any earlier callback.
    pub fn register_callback<F>(&self, callback: F, concurrency: usize) -> HsiResult<()>
    where
        F: Fn(HsiResult<WorkerResult>) + Send + Sync + 'static,
    {
        if concurrency == 0 {
            return Err(HsiError::Configuration(
                "Callback concurrency must be at least 1".into(),
            ));
        }
        let task = callback::spawn(
            Arc::clone(&self.shared.output),
            Arc::new(callback),
            concurrency,
        );
        if let Some(previous) = self.runtime.lock().callback.replace(task) {
            callback::stop(previous);
        }
        Ok(())
    }

    pub fn reset_callback(&self) {
        if let Some(task) = self.runtime.lock().callback.take() {
            callback::stop(task);
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Spawn the feeder and the processors.
    ///
    /// Accepted from Unconfigured, Configured and Stopped. Without a
    /// pipeline the worker runs in pass-through mode.
    pub fn start(&self) -> HsiResult<()> {
        let mut runtime = self.runtime.lock();
        match self.state() {
            WorkerState::Running => return Ok(()),
            WorkerState::Draining => {
                return Err(HsiError::Configuration(
                    "Worker is still draining".into(),
                ))
            }
            _ => {}
        }

        let (draining, rx) = watch::channel(false);
        runtime.feeder = Some(tokio::spawn(
            feed(Arc::clone(&self.shared), rx.clone()).instrument(self.span.clone()),
        ));
        runtime.processors = (0..self.shared.config.worker_count)
            .map(|i| {
                tokio::spawn(
                    process(Arc::clone(&self.shared), i, rx.clone()).instrument(self.span.clone()),
                )
            })
            .collect();
        runtime.draining = Some(draining);
        self.shared.set_state(WorkerState::Running);
        Ok(())
    }

    /// Running → Draining → Stopped.
    ///
    /// Frames already taken in are finished within the shutdown timeout;
    /// anything still running after it is aborted. The exporter is flushed.
    pub async fn stop(&self) -> HsiResult<()> {
        let (feeder, processors, draining) = {
            let mut runtime = self.runtime.lock();
            if self.state() != WorkerState::Running {
                return Ok(());
            }
            (
                runtime.feeder.take(),
                std::mem::take(&mut runtime.processors),
                runtime.draining.take(),
            )
        };
        self.shared.set_state(WorkerState::Draining);
        if let Some(draining) = &draining {
            draining.send_replace(true);
        }

        let tasks: Vec<JoinHandle<()>> = feeder.into_iter().chain(processors).collect();
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let timeout = self.shared.config.shutdown_timeout();
        let mut errors = Vec::new();
        if tokio::time::timeout(timeout, join_all(tasks)).await.is_err() {
            aborts.iter().for_each(|a| a.abort());
            self.span.in_scope(|| {
                warn!(timeout_ms = timeout.as_millis() as u64, "Drain timed out, tasks aborted")
            });
            errors.push(HsiError::timeout("worker drain", Wait::For(timeout)));
        }

        let exporter = self.shared.collaborators.read().exporter.clone();
        if let Some(exporter) = exporter {
            if let Err(e) = exporter.flush().await {
                errors.push(e);
            }
        }
        self.shared.set_state(WorkerState::Stopped);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HsiError::ShutdownFailed(errors))
        }
    }

    /// Stop, then discard queued work and detach the source, so a new
    /// source can be attached.
    pub async fn reset(&self) -> HsiResult<()> {
        let stopped = self.stop().await;
        {
            let mut rx = self.shared.intake_rx.lock().await;
            while rx.try_recv().is_ok() {}
        }
        let cleared = self.shared.output.clear();
        *self.shared.source.write() = Source::None;
        self.shared.last_sequence.lock().clear();
        let next = if self.shared.collaborators.read().pipeline.is_some() {
            WorkerState::Configured
        } else {
            WorkerState::Unconfigured
        };
        self.shared.set_state(next);
        self.span.in_scope(|| info!(cleared, "Worker reset"));
        stopped
    }

    pub fn stats(&self) -> WorkerStats {
        let output = &self.shared.output;
        WorkerStats {
            ingested: self.shared.ingested.load(Ordering::Relaxed),
            delivered: output.delivered.load(Ordering::Relaxed),
            dropped: output.dropped.load(Ordering::Relaxed),
            out_of_sequence: self.shared.out_of_sequence.load(Ordering::Relaxed),
            stalled: output.stalled.load(Ordering::Relaxed),
            failures: self.shared.failures.load(Ordering::Relaxed),
            queue_used: output.len(),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let runtime = self.runtime.get_mut();
        runtime
            .feeder
            .take()
            .into_iter()
            .chain(runtime.processors.drain(..))
            .chain(runtime.callback.take())
            .for_each(|task| task.abort());
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("queue_used", &self.queue_used())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsi_core::{ImageBuffer, SessionInfo};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn frame(seq: u64) -> Frame {
        let raw = ImageBuffer::filled(2, 1, vec![500.0, 600.0], seq as f32).unwrap();
        Frame::new(format!("t_{}", seq), SessionInfo::new("t", 1, seq), raw)
    }

    const WAIT: Wait = Wait::For(Duration::from_secs(2));

    #[tokio::test]
    async fn test_state_machine() {
        let worker = Worker::new(WorkerConfig::sequential()).unwrap();
        assert_eq!(worker.state(), WorkerState::Unconfigured);
        let pipeline = ProcessingPipeline::new(hsi_core::ProcessingSource::Calibration(Arc::new(
            hsi_core::CalibrationBundle::new("c"),
        )))
        .unwrap();
        worker.set_processing_context(Some(Arc::new(pipeline)));
        assert_eq!(worker.state(), WorkerState::Configured);
        worker.start().unwrap();
        assert_eq!(worker.state(), WorkerState::Running);
        worker.stop().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(worker.ingest_frame(frame(1)).await.unwrap_err().is_configuration());
        worker.reset().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Configured);
    }

    #[tokio::test]
    async fn test_passthrough_without_pipeline() {
        let worker = Worker::new(WorkerConfig::sequential()).unwrap();
        worker.start().unwrap();
        worker.ingest_frame(frame(1)).await.unwrap();
        let result = worker.get_next_result(WAIT).await.unwrap();
        assert_eq!(result.frame.sequence(), 1);
        assert!(result.view.is_none());
        assert!(result.frame.cube().is_none());
    }

    #[tokio::test]
    async fn test_start_from_unconfigured_runs_pass_through() {
        let worker = Worker::new(WorkerConfig::sequential()).unwrap();
        worker.start().unwrap();
        assert_eq!(worker.state(), WorkerState::Running);
        worker.ingest_frame(frame(1)).await.unwrap();
        assert!(worker.get_next_result(WAIT).await.unwrap().frame.cube().is_none());

        worker.stop().await.unwrap();
        worker.start().unwrap();
        assert_eq!(worker.state(), WorkerState::Running);
        worker.ingest_frame(frame(2)).await.unwrap();
        assert_eq!(worker.get_next_result(WAIT).await.unwrap().frame.sequence(), 2);

        let pipeline = ProcessingPipeline::new(hsi_core::ProcessingSource::Calibration(Arc::new(
            hsi_core::CalibrationBundle::new("c"),
        )))
        .unwrap();
        worker.set_processing_context(Some(Arc::new(pipeline)));
        assert_eq!(worker.state(), WorkerState::Running);

        worker.reset().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Configured);
    }

    #[tokio::test]
    async fn test_frames_ingested_before_start_are_kept() {
        let worker = Worker::new(WorkerConfig::sequential()).unwrap();
        worker.ingest_frame(frame(1)).await.unwrap();
        worker.ingest_frame(frame(2)).await.unwrap();
        worker.start().unwrap();
        assert_eq!(worker.get_next_result(WAIT).await.unwrap().frame.sequence(), 1);
        assert_eq!(worker.get_next_result(WAIT).await.unwrap().frame.sequence(), 2);
    }

    #[tokio::test]
    async fn test_out_of_sequence_discarded_by_default() {
        let worker = Worker::new(WorkerConfig::sequential()).unwrap();
        worker.start().unwrap();
        for seq in [1, 3, 2, 4] {
            worker.ingest_frame(frame(seq)).await.unwrap();
        }
        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(worker.get_next_result(WAIT).await.unwrap().frame.sequence());
        }
        assert_eq!(got, vec![1, 3, 4]);
        assert_eq!(worker.stats().out_of_sequence, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_out_of_sequence_discard_is_logged() {
        let worker = Worker::new(WorkerConfig::sequential()).unwrap();
        worker.start().unwrap();
        worker.ingest_frame(frame(5)).await.unwrap();
        worker.ingest_frame(frame(4)).await.unwrap();
        assert!(logs_contain("Out-of-sequence frame discarded"));
        assert!(logs_contain("Worker state changed"));
    }

    #[tokio::test]
    async fn test_keep_out_of_sequence() {
        let config = WorkerConfig {
            keep_out_of_sequence: true,
            ..WorkerConfig::sequential()
        };
        let worker = Worker::new(config).unwrap();
        worker.start().unwrap();
        for seq in [2, 1] {
            worker.ingest_frame(frame(seq)).await.unwrap();
        }
        assert_eq!(worker.get_next_result(WAIT).await.unwrap().frame.sequence(), 2);
        assert_eq!(worker.get_next_result(WAIT).await.unwrap().frame.sequence(), 1);
    }

    #[tokio::test]
    async fn test_get_next_result_poll_times_out() {
        let worker = Worker::new(WorkerConfig::sequential()).unwrap();
        assert!(!worker.has_next_result());
        let err = worker.get_next_result(Wait::Poll).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_queue_limit_setters() {
        let worker = Worker::new(WorkerConfig::sequential()).unwrap();
        worker.set_queue_limits(QueueLimits::new(2, 3).unwrap()).unwrap();
        assert_eq!(worker.queue_limits(), QueueLimits::new(2, 3).unwrap());
        let err = worker
            .set_queue_limits(QueueLimits {
                soft_limit: 5,
                hard_limit: 3,
            })
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(worker.queue_limits().hard_limit, 3);
        worker.set_worker_can_drop(true);
        assert!(worker.worker_can_drop());
    }

    #[tokio::test]
    async fn test_register_callback_rejects_zero_concurrency() {
        let worker = Worker::new(WorkerConfig::sequential()).unwrap();
        assert!(worker.register_callback(|_| {}, 0).is_err());
    }
}
