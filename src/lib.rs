//! # Hyperspectral Capture Pipeline
//!
//! Moves frames from a camera (or a replayed session) through a processing
//! pipeline into export and view sinks, with explicit backpressure between
//! the hardware, the worker and the calling application.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: [`AcquisitionContext`], the live capture source. Owns a
//!   [`CameraDevice`](hsi_core::CameraDevice), runs its command channel and the
//!   three cascaded buffering stages (hardware, driver, ingest).
//! - **`worker`**: [`Worker`], which pulls frames from one source, runs the
//!   processing pipeline and the sinks, and publishes results into a bounded
//!   output queue with a configurable drop policy.
//! - **`queue`**: The bounded FIFO both of the above are built on.
//! - **`config`**: Figment-based [`PipelineConfig`] (TOML file + `HSI_` environment).
//! - **`tracing_setup`**: `tracing-subscriber` initialisation.
//!
//! Data types, errors, the wait convention and the collaborator traits live in
//! [`hsi_core`] and are re-exported here.
//!
//! ## Example
//!
//! ```rust
//! use hsi_capture::{Wait, Worker, WorkerConfig};
//! use hsi_driver_mock::synthetic_session;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let worker = Worker::new(WorkerConfig::sequential())?;
//! worker.set_session(Some(synthetic_session("demo", 3, &[])), false)?;
//! worker.start()?;
//!
//! for _ in 0..3 {
//!     let result = worker.get_next_result(Wait::For(Duration::from_secs(1))).await?;
//!     println!("{}", result.frame.name);
//! }
//! assert_eq!(worker.wait_session_done().await?, 3);
//! worker.stop().await?;
//! # Ok::<(), hsi_capture::HsiError>(())
//! # }).unwrap();
//! ```

pub mod acquisition;
pub mod config;
pub mod queue;
pub mod tracing_setup;
pub mod worker;

pub use acquisition::{AcquisitionConfig, AcquisitionContext, AcquisitionStats, Stage, StageStatus};
pub use config::PipelineConfig;
pub use queue::BoundedQueue;
pub use worker::{
    QueueLimits, ResultCallback, SessionProgress, Worker, WorkerConfig, WorkerResult, WorkerState,
    WorkerStats,
};

pub use hsi_core::{
    AsyncHandle, AsyncState, CameraDevice, ExportSink, Frame, HardwareError, HardwareErrorKind,
    HsiError, HsiResult, LinkState, ProcessingArgs, ProcessingMode, ProcessingPipeline,
    ProcessingSource, ReferenceKind, SessionFile, SessionInfo, Setting, View, ViewSink, Wait,
};
