//! Worker configuration.

use hsi_core::limits::{
    DEFAULT_HARD_LIMIT, DEFAULT_POLL_INTERVAL, DEFAULT_SOFT_LIMIT, DEFAULT_STALL_TIMEOUT,
    MAX_WORKER_COUNT, SHUTDOWN_TIMEOUT,
};
use hsi_core::{HsiError, HsiResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Output queue thresholds. `soft_limit <= hard_limit` always holds for a
/// value built through [`QueueLimits::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueLimits {
    pub soft_limit: usize,
    pub hard_limit: usize,
}

impl QueueLimits {
    pub fn new(soft_limit: usize, hard_limit: usize) -> HsiResult<Self> {
        let limits = Self {
            soft_limit,
            hard_limit,
        };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> HsiResult<()> {
        if self.hard_limit == 0 {
            return Err(HsiError::Configuration(
                "hard_limit must be at least 1".into(),
            ));
        }
        if self.soft_limit > self.hard_limit {
            return Err(HsiError::Configuration(format!(
                "soft_limit {} exceeds hard_limit {}",
                self.soft_limit, self.hard_limit
            )));
        }
        Ok(())
    }
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            soft_limit: DEFAULT_SOFT_LIMIT,
            hard_limit: DEFAULT_HARD_LIMIT,
        }
    }
}

/// Worker settings. Only `can_drop` and the queue limits change after
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Concurrent processing tasks
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Source re-poll period when no frame is available
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Keep frames whose sequence number goes backwards
    #[serde(default)]
    pub keep_out_of_sequence: bool,
    #[serde(default = "default_hard_limit")]
    pub hard_limit: usize,
    #[serde(default = "default_soft_limit")]
    pub soft_limit: usize,
    /// Evict the oldest result instead of blocking at `hard_limit`
    #[serde(default)]
    pub can_drop: bool,
    /// How long a blocked push waits before it is reported as resource exhaustion
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_ms: u64,
    /// Bound on the Draining phase of `stop()`
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_WORKER_COUNT)
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_hard_limit() -> usize {
    DEFAULT_HARD_LIMIT
}

fn default_soft_limit() -> usize {
    DEFAULT_SOFT_LIMIT
}

fn default_stall_timeout() -> u64 {
    DEFAULT_STALL_TIMEOUT.as_millis() as u64
}

fn default_shutdown_timeout() -> u64 {
    SHUTDOWN_TIMEOUT.as_millis() as u64
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval(),
            keep_out_of_sequence: false,
            hard_limit: default_hard_limit(),
            soft_limit: default_soft_limit(),
            can_drop: false,
            stall_timeout_ms: default_stall_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl WorkerConfig {
    /// Single processing task, so results come out in ingest order.
    pub fn sequential() -> Self {
        Self {
            worker_count: 1,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_limits(mut self, soft_limit: usize, hard_limit: usize) -> Self {
        self.soft_limit = soft_limit;
        self.hard_limit = hard_limit;
        self
    }

    #[must_use]
    pub fn with_can_drop(mut self, can_drop: bool) -> Self {
        self.can_drop = can_drop;
        self
    }

    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn limits(&self) -> QueueLimits {
        QueueLimits {
            soft_limit: self.soft_limit,
            hard_limit: self.hard_limit,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> HsiResult<()> {
        if self.worker_count == 0 || self.worker_count > MAX_WORKER_COUNT {
            return Err(HsiError::Configuration(format!(
                "worker_count {} must be between 1 and {}",
                self.worker_count, MAX_WORKER_COUNT
            )));
        }
        self.limits().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert!(config.worker_count >= 1);
        assert_eq!(config.poll_interval(), Duration::from_millis(5));
        assert!(!config.keep_out_of_sequence);
        assert!(!config.can_drop);
        assert_eq!(config.limits(), QueueLimits::new(90, 100).unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_limits_ordering_enforced() {
        assert!(QueueLimits::new(3, 3).is_ok());
        assert!(QueueLimits::new(4, 3).unwrap_err().is_configuration());
        assert!(QueueLimits::new(0, 0).is_err());
        assert!(WorkerConfig::sequential()
            .with_limits(10, 5)
            .validate()
            .is_err());
    }

    #[test]
    fn test_worker_count_bounds() {
        assert!(WorkerConfig::default().with_worker_count(0).validate().is_err());
        assert!(WorkerConfig::default()
            .with_worker_count(MAX_WORKER_COUNT + 1)
            .validate()
            .is_err());
    }
}
