//! Wait durations for blocking calls.
//!
//! Every blocking call in the pipeline takes an explicit [`Wait`]. The
//! integer convention used by configuration files and foreign callers maps
//! `-1` to [`Wait::Infinite`] and `0` to [`Wait::Poll`].

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// How long a blocking call may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wait {
    /// Block until the operation resolves.
    Infinite,
    /// Check once and return immediately.
    Poll,
    /// Block for at most this long.
    For(Duration),
}

impl Wait {
    /// Map the millisecond convention: negative blocks forever, zero polls.
    #[must_use]
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            ms if ms < 0 => Wait::Infinite,
            0 => Wait::Poll,
            ms => Wait::For(Duration::from_millis(ms.unsigned_abs())),
        }
    }

    /// Inverse of [`Wait::from_millis`].
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        match self {
            Wait::Infinite => -1,
            Wait::Poll => 0,
            Wait::For(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        }
    }

    #[must_use]
    pub fn is_poll(&self) -> bool {
        matches!(self, Wait::Poll) || matches!(self, Wait::For(d) if d.is_zero())
    }

    /// Drive `fut` for at most this wait. `None` means the wait elapsed.
    ///
    /// `Poll` still polls the future once, so work that is already complete
    /// is observed.
    pub async fn run<F: Future>(self, fut: F) -> Option<F::Output> {
        match self {
            Wait::Infinite => Some(fut.await),
            Wait::Poll => tokio::time::timeout(Duration::ZERO, fut).await.ok(),
            Wait::For(d) => tokio::time::timeout(d, fut).await.ok(),
        }
    }
}

impl From<Duration> for Wait {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Wait::Poll
        } else {
            Wait::For(d)
        }
    }
}

impl std::fmt::Display for Wait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Wait::Infinite => write!(f, "infinite"),
            Wait::Poll => write!(f, "poll"),
            Wait::For(d) => write!(f, "{} ms", d.as_millis()),
        }
    }
}
