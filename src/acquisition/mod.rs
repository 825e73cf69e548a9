//! Live capture source.
//!
//! An [`AcquisitionContext`] owns a [`CameraDevice`] and runs four kinds of
//! background task for it:
//!
//! - **Link monitor**: polls the device's component links and publishes the
//!   aggregate [`LinkState`]. The state is polled, never pushed.
//! - **Command executor**: dispatches setting changes and explicit captures
//!   one at a time (see [`commands`]).
//! - **Producer**: while continuous mode is on, exposes at the configured
//!   frame rate and pushes into the hardware stage. A full hardware stage
//!   loses the frame.
//! - **Pumps**: move frames hardware → driver → ingest, blocking when the
//!   next stage is full.
//!
//! The three stages are observable separately, so a stalled consumer shows
//! up as a full ingest stage first and as lost frames last.
//!
//! Every setting has an `_async` form returning an [`AsyncHandle`] and a
//! blocking form that awaits the hardware's acknowledgement.
//!
//! # Example
//!
//! ```rust,ignore
//! let ctx = AcquisitionContext::open(device, None, AcquisitionConfig::default()).await?;
//! ctx.set_integration_time(12.5).await?;
//! let frame = ctx.capture_at(Wait::For(Duration::from_secs(1))).await?;
//! ```

pub mod commands;
pub mod config;
mod settings;
pub mod stage;

pub use config::AcquisitionConfig;
pub use stage::{AcquisitionStats, Stage, StageStatus};

use crate::queue::BoundedQueue;
use commands::{CommandQueue, Request};
use hsi_core::limits::{COMMAND_TIMEOUT, MAX_FRAME_PERIOD};
use hsi_core::{
    pending, slot_pool, AsyncHandle, AsyncState, AtomicLinkState, CameraDevice, Calibration,
    ComponentInfo, ExposureRequest, Frame, HardwareError, HardwareErrorKind, HsiError, HsiResult,
    LinkState, OperationMode, PendingOperation, SessionInfo, Setting, SlotPool, Wait,
};
use hsi_pool::Loaned;
use parking_lot::{Mutex, RwLock};
use settings::SettingsState;
use stage::AcquisitionCounters;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// State shared with the background tasks.
pub(crate) struct Shared {
    device: Arc<dyn CameraDevice>,
    calibration_id: Option<String>,
    config: AcquisitionConfig,
    components: Vec<ComponentInfo>,
    link: AtomicLinkState,
    online: RwLock<Vec<bool>>,
    link_changed: Notify,
    settings: RwLock<SettingsState>,
    session: Mutex<SessionInfo>,
    commands: CommandQueue,
    slots: Arc<SlotPool>,
    next_operation: AtomicU64,
    hardware: BoundedQueue<Frame>,
    driver: BoundedQueue<Frame>,
    ingest: BoundedQueue<Frame>,
    counters: AcquisitionCounters,
    continuous: watch::Sender<bool>,
    last_frame_bytes: AtomicU64,
}

impl Shared {
    fn queue(&self, stage: Stage) -> &BoundedQueue<Frame> {
        match stage {
            Stage::Hardware => &self.hardware,
            Stage::Driver => &self.driver,
            Stage::Ingest => &self.ingest,
        }
    }

    async fn refresh_link(&self) -> LinkState {
        let online = self.device.poll_link().await;
        let state = LinkState::from_components(&online);
        *self.online.write() = online;
        let previous = self.link.swap(state);
        if previous != state {
            info!(?previous, current = ?state, "Camera link state changed");
            self.link_changed.notify_waiters();
        }
        state
    }

    /// Session stamp for the next frame; advances the sequence number.
    fn stamp(&self) -> SessionInfo {
        let mut session = self.session.lock();
        let stamp = session.clone();
        session.sequence_number += 1;
        stamp
    }

    fn exposure_request(&self) -> ExposureRequest {
        let settings = self.settings.read();
        ExposureRequest {
            integration_time_ms: settings.integration_time_ms,
            averages: settings.average,
            preview: settings.preview_mode,
            operation_mode: settings.operation_mode,
        }
    }

    async fn expose_frame(&self) -> Result<Frame, HardwareError> {
        let request = self.exposure_request();
        let raw = self.device.expose(&request).await?;
        let session = self.stamp();
        let name = format!("{}_{:06}", session.name, session.sequence_number);

        let mut frame = Frame::new(name, session, raw).with_integration_time(request.integration_time_ms);
        frame.averages = request.averages;
        frame.operation_mode = request.operation_mode;
        frame.product_name = Some(self.device.product_name().to_string());
        frame.serial_number = self.device.serial_number().map(str::to_string);
        if let Some(id) = &self.calibration_id {
            frame = frame.with_calibration(id.clone());
        }
        self.last_frame_bytes
            .store(frame.byte_len() as u64, Ordering::Relaxed);
        Ok(frame)
    }
}

// =============================================================================
// Background tasks
// =============================================================================

async fn monitor_link(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(shared.config.link_poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        shared.refresh_link().await;
    }
}

/// Time between continuous frames, clamped to [`MAX_FRAME_PERIOD`].
fn frame_period(fps: f64) -> Duration {
    match Duration::try_from_secs_f64(1.0 / fps) {
        Ok(period) if period <= MAX_FRAME_PERIOD => period,
        _ => {
            warn!(
                fps,
                max_period_s = MAX_FRAME_PERIOD.as_secs(),
                "Frame period out of range, clamped"
            );
            MAX_FRAME_PERIOD
        }
    }
}

async fn produce(shared: Arc<Shared>) {
    let mut continuous = shared.continuous.subscribe();
    let mut losing = false;
    loop {
        if continuous.wait_for(|on| *on).await.is_err() {
            return;
        }
        let started = Instant::now();
        let period = frame_period(shared.settings.read().fps);

        if shared.link.load() == LinkState::Offline {
            tokio::time::sleep(shared.config.link_poll_interval()).await;
            continue;
        }

        match shared.expose_frame().await {
            Ok(frame) => {
                AcquisitionCounters::bump(&shared.counters.produced);
                match shared.hardware.try_push(frame) {
                    Ok(()) => losing = false,
                    Err(frame) => {
                        let lost = AcquisitionCounters::bump(&shared.counters.lost);
                        if !losing {
                            AcquisitionCounters::bump(&shared.counters.discontinuities);
                            losing = true;
                        }
                        warn!(
                            frame = %frame.name,
                            sequence = frame.sequence(),
                            lost,
                            "Hardware queue full, frame lost"
                        );
                    }
                }
            }
            Err(e) => {
                AcquisitionCounters::bump(&shared.counters.hardware_errors);
                error!(error = %e, "Continuous exposure failed");
            }
        }

        if let Some(rest) = period.checked_sub(started.elapsed()) {
            tokio::time::sleep(rest).await;
        }
    }
}

async fn pump(shared: Arc<Shared>, from: Stage, to: Stage) {
    while let Some(frame) = shared.queue(from).pop(Wait::Infinite).await {
        if shared.queue(to).push(frame, Wait::Infinite).await.is_err() {
            break;
        }
    }
    debug!(from = from.label(), to = to.label(), "Stage pump stopped");
}

// =============================================================================
// AcquisitionContext
// =============================================================================

/// Live capture source backed by a camera device.
pub struct AcquisitionContext {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AcquisitionContext {
    /// Connect to `device` and start the background tasks.
    ///
    /// `calibration`, when given, stamps its id onto every captured frame.
    pub async fn open(
        device: Arc<dyn CameraDevice>,
        calibration: Option<Arc<dyn Calibration>>,
        config: AcquisitionConfig,
    ) -> HsiResult<Self> {
        config.validate()?;
        let components = device.components();
        if components.is_empty() {
            return Err(HsiError::Configuration(format!(
                "Device '{}' reports no components",
                device.product_name()
            )));
        }

        let (continuous, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            calibration_id: calibration.map(|c| c.id().to_string()),
            link: AtomicLinkState::new(LinkState::Offline),
            online: RwLock::new(vec![false; components.len()]),
            link_changed: Notify::new(),
            settings: RwLock::new(SettingsState::new(
                components.len(),
                config.integration_time_ms,
                config.fps,
            )),
            session: Mutex::new(SessionInfo::default()),
            commands: CommandQueue::default(),
            slots: slot_pool(config.pending_slots),
            next_operation: AtomicU64::new(1),
            hardware: BoundedQueue::new("hardware", config.hardware_queue),
            driver: BoundedQueue::new("driver", config.driver_queue),
            ingest: BoundedQueue::new("ingest", config.ingest_queue),
            counters: AcquisitionCounters::default(),
            continuous,
            last_frame_bytes: AtomicU64::new(0),
            components,
            config,
            device,
        });

        let state = shared.refresh_link().await;
        info!(
            product = shared.device.product_name(),
            components = shared.components.len(),
            link = ?state,
            "Acquisition context opened"
        );

        let tasks = vec![
            tokio::spawn(monitor_link(Arc::clone(&shared))),
            tokio::spawn(commands::run_executor(Arc::clone(&shared))),
            tokio::spawn(produce(Arc::clone(&shared))),
            tokio::spawn(pump(Arc::clone(&shared), Stage::Hardware, Stage::Driver)),
            tokio::spawn(pump(Arc::clone(&shared), Stage::Driver, Stage::Ingest)),
        ];
        Ok(Self {
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    // -------------------------------------------------------------------------
    // Link and identity
    // -------------------------------------------------------------------------

    /// Last polled link state. Never blocks.
    pub fn state(&self) -> LinkState {
        self.shared.link.load()
    }

    /// Poll the device now instead of waiting for the monitor.
    pub async fn refresh_state(&self) -> LinkState {
        self.shared.refresh_link().await
    }

    pub fn product_name(&self) -> &str {
        self.shared.device.product_name()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.shared.device.serial_number()
    }

    pub fn calibration_id(&self) -> Option<&str> {
        self.shared.calibration_id.as_deref()
    }

    pub fn component_count(&self) -> usize {
        self.shared.components.len()
    }

    pub fn component_info(&self, id: usize) -> HsiResult<ComponentInfo> {
        self.shared
            .components
            .get(id)
            .cloned()
            .ok_or_else(|| self.no_component(id))
    }

    pub fn component_online(&self, id: usize) -> bool {
        self.shared.online.read().get(id).copied().unwrap_or(false)
    }

    /// Sensor temperature in degrees Celsius, if the component reports one.
    pub fn temperature(&self, id: usize) -> HsiResult<Option<f64>> {
        if id >= self.component_count() {
            return Err(self.no_component(id));
        }
        Ok(self.shared.device.temperature(id))
    }

    fn no_component(&self, id: usize) -> HsiError {
        HsiError::Configuration(format!(
            "Component {} does not exist ({} components)",
            id,
            self.component_count()
        ))
    }

    // -------------------------------------------------------------------------
    // Setting getters
    // -------------------------------------------------------------------------

    pub fn operation_mode(&self) -> OperationMode {
        self.shared.settings.read().operation_mode
    }

    pub fn integration_time(&self) -> f64 {
        self.shared.settings.read().integration_time_ms
    }

    pub fn fps(&self) -> f64 {
        self.shared.settings.read().fps
    }

    pub fn auto_exposure(&self) -> bool {
        self.shared.settings.read().auto_exposure
    }

    pub fn average(&self) -> u32 {
        self.shared.settings.read().average
    }

    pub fn continuous(&self) -> bool {
        self.shared.settings.read().continuous
    }

    pub fn preview_mode(&self) -> bool {
        self.shared.settings.read().preview_mode
    }

    pub fn gain(&self, component: usize) -> HsiResult<f64> {
        self.shared
            .settings
            .read()
            .gains
            .get(component)
            .copied()
            .ok_or_else(|| self.no_component(component))
    }

    pub fn integration_time_factor(&self, component: usize) -> HsiResult<f64> {
        self.shared
            .settings
            .read()
            .factors
            .get(component)
            .copied()
            .ok_or_else(|| self.no_component(component))
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    fn reserve_slot(&self, operation: &str) -> HsiResult<Loaned<PendingOperation>> {
        let mut slot = self.shared.slots.try_acquire().ok_or_else(|| {
            error!(
                operation,
                outstanding = self.shared.slots.in_use(),
                "No free pending-operation slot"
            );
            HsiError::exhausted(
                "pending_operations",
                format!(
                    "{} operations outstanding; release finished handles",
                    self.shared.slots.size()
                ),
            )
        })?;
        slot.id = self.shared.next_operation.fetch_add(1, Ordering::Relaxed);
        slot.operation = operation.to_string();
        Ok(slot)
    }

    /// Queue a setting change and return its handle immediately.
    pub fn submit(&self, setting: Setting) -> HsiResult<AsyncHandle<()>> {
        settings::validate(&setting, self.component_count())?;
        let slot = self.reserve_slot(setting.label())?;
        let (completer, handle) = pending::<()>(setting.label());
        debug!(operation = setting.label(), id = slot.id, "Setting queued");
        let overwritten = self.shared.commands.submit(Request::Setting(setting, completer));
        for _ in 0..overwritten {
            AcquisitionCounters::bump(&self.shared.counters.overwritten);
        }
        Ok(handle.with_slot(slot))
    }

    /// Apply a setting and wait for the hardware to acknowledge it.
    pub async fn apply(&self, setting: Setting) -> HsiResult<()> {
        let operation = setting.label();
        let handle = self.submit(setting)?;
        resolve(handle, operation, Wait::For(COMMAND_TIMEOUT)).await
    }

    pub fn set_operation_mode_async(&self, mode: OperationMode) -> HsiResult<AsyncHandle<()>> {
        self.submit(Setting::OperationMode(mode))
    }

    pub async fn set_operation_mode(&self, mode: OperationMode) -> HsiResult<()> {
        self.apply(Setting::OperationMode(mode)).await
    }

    pub fn set_integration_time_async(&self, ms: f64) -> HsiResult<AsyncHandle<()>> {
        self.submit(Setting::IntegrationTime(ms))
    }

    pub async fn set_integration_time(&self, ms: f64) -> HsiResult<()> {
        self.apply(Setting::IntegrationTime(ms)).await
    }

    pub fn set_integration_time_factor_async(
        &self,
        component: usize,
        factor: f64,
    ) -> HsiResult<AsyncHandle<()>> {
        self.submit(Setting::IntegrationTimeFactor { component, factor })
    }

    pub async fn set_integration_time_factor(&self, component: usize, factor: f64) -> HsiResult<()> {
        self.apply(Setting::IntegrationTimeFactor { component, factor })
            .await
    }

    pub fn set_fps_async(&self, fps: f64) -> HsiResult<AsyncHandle<()>> {
        self.submit(Setting::Fps(fps))
    }

    pub async fn set_fps(&self, fps: f64) -> HsiResult<()> {
        self.apply(Setting::Fps(fps)).await
    }

    pub fn set_gain_async(&self, component: usize, value: f64) -> HsiResult<AsyncHandle<()>> {
        self.submit(Setting::Gain { component, value })
    }

    pub async fn set_gain(&self, component: usize, value: f64) -> HsiResult<()> {
        self.apply(Setting::Gain { component, value }).await
    }

    pub fn set_auto_exposure_async(&self, on: bool) -> HsiResult<AsyncHandle<()>> {
        self.submit(Setting::AutoExposure(on))
    }

    pub async fn set_auto_exposure(&self, on: bool) -> HsiResult<()> {
        self.apply(Setting::AutoExposure(on)).await
    }

    pub fn set_average_async(&self, frames: u32) -> HsiResult<AsyncHandle<()>> {
        self.submit(Setting::Average(frames))
    }

    pub async fn set_average(&self, frames: u32) -> HsiResult<()> {
        self.apply(Setting::Average(frames)).await
    }

    /// Start or stop free-running acquisition into the hardware stage.
    ///
    /// Stopping does not cancel handles already issued; they still resolve
    /// and must be released.
    pub fn set_continuous_async(&self, on: bool) -> HsiResult<AsyncHandle<()>> {
        self.submit(Setting::Continuous(on))
    }

    pub async fn set_continuous(&self, on: bool) -> HsiResult<()> {
        self.apply(Setting::Continuous(on)).await
    }

    pub fn set_preview_mode_async(&self, on: bool) -> HsiResult<AsyncHandle<()>> {
        self.submit(Setting::PreviewMode(on))
    }

    pub async fn set_preview_mode(&self, on: bool) -> HsiResult<()> {
        self.apply(Setting::PreviewMode(on)).await
    }

    // -------------------------------------------------------------------------
    // Capture
    // -------------------------------------------------------------------------

    /// Request a single frame. Always asynchronous.
    ///
    /// The frame is delivered through the handle only, never through the
    /// stages.
    pub fn capture(&self) -> HsiResult<AsyncHandle<Frame>> {
        let slot = self.reserve_slot("capture")?;
        let (completer, handle) = pending::<Frame>("capture");
        self.shared.commands.submit(Request::Capture(completer));
        Ok(handle.with_slot(slot))
    }

    /// Capture and wait up to `wait` for the frame.
    ///
    /// Fails with a timeout at once when the camera is offline and `wait`
    /// is finite, since nothing can be dispatched.
    pub async fn capture_at(&self, wait: Wait) -> HsiResult<Frame> {
        if wait != Wait::Infinite && self.state() == LinkState::Offline {
            warn!(%wait, "Capture requested while camera is offline");
            return Err(HsiError::timeout("capture", wait));
        }
        let handle = self.capture()?;
        resolve(handle, "capture", wait).await
    }

    // -------------------------------------------------------------------------
    // Session stamping
    // -------------------------------------------------------------------------

    /// Stamp subsequent frames with `info`; its sequence number is used for
    /// the next frame and incremented after each one.
    pub fn set_session_info(&self, info: SessionInfo) {
        info!(session = %info.name, number = info.session_number, "Session info set");
        *self.shared.session.lock() = info;
    }

    /// Stamp the next frame will carry.
    pub fn session_info(&self) -> SessionInfo {
        self.shared.session.lock().clone()
    }

    // -------------------------------------------------------------------------
    // Stages
    // -------------------------------------------------------------------------

    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        let queue = self.shared.queue(stage);
        StageStatus {
            stage,
            capacity: queue.capacity(),
            used: queue.len(),
        }
    }

    /// All stages, sensor side first.
    pub fn stages(&self) -> [StageStatus; 3] {
        Stage::ALL.map(|stage| self.stage_status(stage))
    }

    pub fn queue_size(&self) -> usize {
        self.shared.ingest.capacity()
    }

    pub fn queue_used(&self) -> usize {
        self.shared.ingest.len()
    }

    /// Resize the ingest stage. A size below the frames currently waiting
    /// is refused.
    pub fn set_queue_size(&self, size: usize) -> HsiResult<()> {
        if size == 0 {
            return Err(HsiError::Configuration(
                "Ingest queue size must be at least 1".into(),
            ));
        }
        self.shared.ingest.resize(size, false).map_err(|used| {
            HsiError::Configuration(format!(
                "Ingest queue holds {} frames, cannot shrink to {}",
                used, size
            ))
        })?;
        Ok(())
    }

    pub fn has_next_measurement(&self) -> bool {
        !self.shared.ingest.is_empty()
    }

    pub fn try_next_measurement(&self) -> Option<Frame> {
        self.shared.ingest.try_pop()
    }

    /// Pop the oldest frame from the ingest stage.
    pub async fn next_measurement(&self, wait: Wait) -> HsiResult<Frame> {
        self.shared
            .ingest
            .pop(wait)
            .await
            .ok_or_else(|| HsiError::timeout("next_measurement", wait))
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    /// Estimated data rate in bytes per second at the current frame rate.
    pub fn bandwidth(&self) -> f64 {
        self.shared.last_frame_bytes.load(Ordering::Relaxed) as f64 * self.fps()
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.shared.counters.snapshot()
    }

    /// Handles currently holding a pending-operation slot.
    pub fn pending_operations(&self) -> usize {
        self.shared.slots.in_use()
    }

    /// Requests waiting to be dispatched.
    pub fn queued_commands(&self) -> usize {
        self.shared.commands.len()
    }

    /// Stop the background tasks and close the stages.
    pub fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        for stage in Stage::ALL {
            self.shared.queue(stage).close();
        }
        info!(product = self.product_name(), "Acquisition context closed");
    }
}

impl Drop for AcquisitionContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AcquisitionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionContext")
            .field("product", &self.product_name())
            .field("state", &self.state())
            .field("stages", &self.stages())
            .finish_non_exhaustive()
    }
}

/// Wait for a handle and turn anything short of `Done` into an error.
async fn resolve<T: Clone>(mut handle: AsyncHandle<T>, operation: &str, wait: Wait) -> HsiResult<T> {
    match handle.get(wait).await? {
        AsyncState::Done(value) => Ok(value),
        AsyncState::Overwritten => Err(HardwareError::new(
            operation,
            HardwareErrorKind::Preempted,
            "superseded by a newer request",
        )
        .into()),
        AsyncState::Deferred | AsyncState::Timeout => Err(HsiError::timeout(operation, wait)),
    }
}
