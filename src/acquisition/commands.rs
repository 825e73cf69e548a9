//! Command channel between the caller and the hardware.
//!
//! Requests are executed one at a time, in submission order. The hardware
//! tracks only the latest request per [`Channel`], so submitting a setting
//! while an older one for the same channel is still queued overwrites the
//! older one. A request already dispatched to the device cannot be preempted.
//!
//! Nothing is dispatched while the link is offline; those requests stay
//! queued and their handles report `Deferred`.

use super::stage::AcquisitionCounters;
use super::Shared;
use hsi_core::{Channel, Completer, Frame, LinkState, Setting};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

pub(crate) enum Request {
    Setting(Setting, Completer<()>),
    Capture(Completer<Frame>),
}

impl Request {
    fn channel(&self) -> Channel {
        match self {
            Request::Setting(setting, _) => setting.channel(),
            Request::Capture(_) => Channel::Capture,
        }
    }

    fn overwrite(self) {
        match self {
            Request::Setting(_, completer) => completer.overwrite(),
            Request::Capture(completer) => completer.overwrite(),
        }
    }
}

#[derive(Default)]
pub(crate) struct CommandQueue {
    queue: Mutex<VecDeque<Request>>,
    ready: Notify,
}

impl CommandQueue {
    /// Queue a request. Returns the number of older requests it overwrote.
    pub fn submit(&self, request: Request) -> usize {
        let replaced: Vec<Request> = {
            let mut queue = self.queue.lock();
            let mut replaced = Vec::new();
            // Every capture is its own request.
            if let Request::Setting(..) = request {
                let channel = request.channel();
                let mut kept = VecDeque::with_capacity(queue.len() + 1);
                for queued in queue.drain(..) {
                    if queued.channel() == channel {
                        replaced.push(queued);
                    } else {
                        kept.push_back(queued);
                    }
                }
                *queue = kept;
            }
            queue.push_back(request);
            replaced
        };

        let count = replaced.len();
        for old in replaced {
            if let Request::Setting(setting, _) = &old {
                warn!(
                    operation = setting.label(),
                    "Queued request overwritten by a newer one"
                );
            }
            old.overwrite();
        }
        self.ready.notify_waiters();
        count
    }

    fn pop(&self) -> Option<Request> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Shared {
    /// Wait for a request that may be dispatched now.
    async fn next_request(&self) -> Request {
        loop {
            let queued = self.commands.ready.notified();
            let link = self.link_changed.notified();
            tokio::pin!(queued);
            tokio::pin!(link);
            queued.as_mut().enable();
            link.as_mut().enable();

            if self.link.load() != LinkState::Offline {
                if let Some(request) = self.commands.pop() {
                    return request;
                }
            }
            tokio::select! {
                _ = queued => {}
                _ = link => {}
            }
        }
    }
}

/// Execute queued requests until the context shuts down.
pub(crate) async fn run_executor(shared: Arc<Shared>) {
    loop {
        match shared.next_request().await {
            Request::Setting(setting, completer) => {
                completer.dispatched();
                match shared.device.apply(&setting).await {
                    Ok(()) => {
                        shared.settings.write().record(&setting);
                        if let Setting::Continuous(on) = setting {
                            shared.continuous.send_replace(on);
                        }
                        debug!(operation = setting.label(), "Setting acknowledged");
                        completer.complete(());
                    }
                    Err(e) => {
                        error!(operation = setting.label(), error = %e, "Setting failed");
                        completer.fail(e);
                    }
                }
            }
            Request::Capture(completer) => {
                completer.dispatched();
                match shared.expose_frame().await {
                    Ok(frame) => {
                        debug!(frame = %frame.name, sequence = frame.sequence(), "Captured");
                        completer.complete(frame);
                    }
                    Err(e) => {
                        AcquisitionCounters::bump(&shared.counters.hardware_errors);
                        error!(error = %e, "Capture failed");
                        completer.fail(e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsi_core::{pending, AsyncState, Wait};

    #[tokio::test]
    async fn test_newer_setting_overwrites_queued_one() {
        let queue = CommandQueue::default();
        let (c1, mut h1) = pending::<()>("set_fps");
        let (c2, mut h2) = pending::<()>("set_fps");
        let (c3, _h3) = pending::<()>("set_average");

        assert_eq!(queue.submit(Request::Setting(Setting::Fps(5.0), c1)), 0);
        assert_eq!(queue.submit(Request::Setting(Setting::Average(2), c3)), 0);
        assert_eq!(queue.submit(Request::Setting(Setting::Fps(9.0), c2)), 1);

        assert_eq!(h1.get(Wait::Poll).await.unwrap(), AsyncState::Overwritten);
        assert_eq!(h2.get(Wait::Poll).await.unwrap(), AsyncState::Deferred);
        assert_eq!(queue.len(), 2);
        assert!(matches!(
            queue.pop(),
            Some(Request::Setting(Setting::Average(2), _))
        ));
    }

    #[tokio::test]
    async fn test_captures_are_not_coalesced() {
        let queue = CommandQueue::default();
        let (c1, mut h1) = pending::<Frame>("capture");
        let (c2, _h2) = pending::<Frame>("capture");
        queue.submit(Request::Capture(c1));
        assert_eq!(queue.submit(Request::Capture(c2)), 0);
        assert_eq!(queue.len(), 2);
        assert_eq!(h1.poll().await.unwrap(), AsyncState::Deferred);
    }
}
