//! Error types shared across the capture pipeline.
//!
//! `HsiError` is the single error enum for every fallible operation. It
//! follows the pipeline's error taxonomy:
//!
//! - **`Configuration`**: an invalid collaborator combination, a queue-limit
//!   ordering violation, or ingestion attempted after a session completed.
//! - **`Hardware`**: an underlying device call failed. Carries a structured
//!   [`HardwareError`]; never retried automatically.
//! - **`Timeout`**: a blocking call exceeded its wait without resolving.
//! - **`Capability`**: a processing mode was requested that the attached
//!   references or calibration cannot satisfy.
//! - **`ResourceExhausted`**: a bounded resource stayed full past its stall
//!   timeout.
//!
//! Deferred, overwritten and timed-out asynchronous operations are *not*
//! errors; they are values of [`crate::handle::AsyncState`].

use crate::frame::ProcessingMode;
use crate::wait::Wait;
use thiserror::Error;

// =============================================================================
// Hardware Errors
// =============================================================================

/// Broad classification of a device failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareErrorKind {
    /// Link to the device was lost mid-operation.
    Communication,
    /// The device refused the request (bad value, unsupported setting).
    Rejected,
    /// The device reported an internal fault.
    Fault,
    /// The device did not answer in time.
    Timeout,
    /// A newer request on the same channel replaced this one.
    Preempted,
    /// The operation was abandoned because its source shut down.
    Abandoned,
    /// Anything else.
    Unknown,
}

impl std::fmt::Display for HardwareErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            HardwareErrorKind::Communication => "communication",
            HardwareErrorKind::Rejected => "rejected",
            HardwareErrorKind::Fault => "fault",
            HardwareErrorKind::Timeout => "timeout",
            HardwareErrorKind::Preempted => "preempted",
            HardwareErrorKind::Abandoned => "abandoned",
            HardwareErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Structured failure reported by a camera device.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Component '{component}' {kind} error: {message}")]
pub struct HardwareError {
    pub component: String,
    pub kind: HardwareErrorKind,
    pub message: String,
}

impl HardwareError {
    pub fn new(
        component: impl Into<String>,
        kind: HardwareErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the pipeline error type.
pub type HsiResult<T> = std::result::Result<T, HsiError>;

/// Primary error type for the capture pipeline.
#[derive(Error, Debug)]
pub enum HsiError {
    /// Invalid configuration or collaborator combination.
    ///
    /// Raised for conflicting sources, `soft_limit > hard_limit`, settings
    /// outside their legal range, and ingestion after a replayed session has
    /// been exhausted. The rejected call leaves prior configuration untouched.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A device call failed.
    ///
    /// **Recovery Strategy**: inspect `kind`; communication failures usually
    /// clear once the link monitor reports the component online again.
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// A blocking call ran out of time.
    ///
    /// Returned by `capture_at`, `next_measurement` and `get_next_result`
    /// when the wait elapses. The underlying operation is still pending and
    /// may complete later.
    #[error("Timed out waiting for {operation} ({waited})")]
    Timeout { operation: String, waited: Wait },

    /// The requested processing mode cannot be satisfied.
    ///
    /// `apply` raises this instead of silently falling back to a weaker mode.
    /// Callers that care should check `is_capable` first.
    #[error("Processing mode {mode} is not available: {reason}")]
    Capability { mode: ProcessingMode, reason: String },

    /// A bounded resource stayed full for too long.
    ///
    /// Raised when the worker output queue is at its hard limit with dropping
    /// disabled and the consumer makes no progress within the stall timeout,
    /// and when every pending-operation slot is held by unreleased handles.
    #[error("Resource exhausted: {resource}: {detail}")]
    ResourceExhausted { resource: String, detail: String },

    /// Standard I/O failure while loading or storing a bundle.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted bundle could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A processing kernel or sink failed on a single frame.
    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Frame dimensions {width}x{height} exceed maximum {max_dimension} per dimension")]
    FrameDimensionsTooLarge {
        width: u32,
        height: u32,
        max_dimension: u32,
    },

    #[error("Size overflow while computing {context}")]
    SizeOverflow { context: &'static str },

    #[error("Frame size {bytes} bytes exceeds maximum {max_bytes} bytes")]
    FrameTooLarge { bytes: usize, max_bytes: usize },

    /// One or more background tasks failed to shut down cleanly.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<HsiError>),
}

impl HsiError {
    /// Shorthand for a `Timeout` error.
    pub fn timeout(operation: impl Into<String>, waited: Wait) -> Self {
        HsiError::Timeout {
            operation: operation.into(),
            waited,
        }
    }

    /// Shorthand for a `ResourceExhausted` error.
    pub fn exhausted(resource: impl Into<String>, detail: impl Into<String>) -> Self {
        HsiError::ResourceExhausted {
            resource: resource.into(),
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, HsiError::Timeout { .. })
    }

    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, HsiError::Configuration(_))
    }
}

impl From<serde_json::Error> for HsiError {
    fn from(err: serde_json::Error) -> Self {
        HsiError::Serialization(err.to_string())
    }
}
