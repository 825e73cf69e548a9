//! Push-style result delivery.
//!
//! A registered callback replaces polling `get_next_result`: a background
//! task pops results and hands each one to the callback on the blocking
//! pool, with at most `concurrency` invocations running at once.

use super::output::{OutputQueue, WorkerResult};
use hsi_core::limits::CALLBACK_POLL_INTERVAL;
use hsi_core::{HsiResult, Wait};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Callback invoked once per result.
pub type ResultCallback = Arc<dyn Fn(HsiResult<WorkerResult>) + Send + Sync>;

pub(crate) fn spawn(
    output: Arc<OutputQueue>,
    callback: ResultCallback,
    concurrency: usize,
) -> JoinHandle<()> {
    let permits = Arc::new(Semaphore::new(concurrency));
    tokio::spawn(async move {
        loop {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                return;
            };
            let Some(entry) = output.pop(Wait::For(CALLBACK_POLL_INTERVAL * 50)).await else {
                continue;
            };
            let callback = Arc::clone(&callback);
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(entry)))
                    .is_err()
                {
                    warn!("Result callback panicked");
                }
            });
        }
    })
}

pub(crate) fn stop(task: JoinHandle<()>) {
    task.abort();
    debug!("Result callback unregistered");
}
