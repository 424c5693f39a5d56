//! Lifecycle events published by `Job::run`.

use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use agendum_core::JobId;

/// Something that happened to a job during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// The handler is about to be invoked.
    Start { id: Option<JobId>, name: String },
    /// The handler returned successfully.
    Success { id: Option<JobId>, name: String },
    /// The run was recorded as failed.
    Fail {
        id: Option<JobId>,
        name: String,
        reason: String,
    },
    /// The run finished, either way.
    Complete { id: Option<JobId>, name: String },
}

impl JobEvent {
    pub fn name(&self) -> &str {
        match self {
            JobEvent::Start { name, .. }
            | JobEvent::Success { name, .. }
            | JobEvent::Fail { name, .. }
            | JobEvent::Complete { name, .. } => name,
        }
    }

    /// Short event label: `start`, `success`, `fail` or `complete`.
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Start { .. } => "start",
            JobEvent::Success { .. } => "success",
            JobEvent::Fail { .. } => "fail",
            JobEvent::Complete { .. } => "complete",
        }
    }
}

/// A subscription to job lifecycle events.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<JobEvent>,
}

impl Subscription {
    /// Try to receive an event without blocking.
    pub fn try_recv(&self) -> Result<JobEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for an event.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<JobEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything received so far.
    pub fn drain(&self) -> Vec<JobEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Best-effort fan-out of events to subscribers.
#[derive(Debug, Default)]
pub(crate) struct EventFanout {
    subscribers: Mutex<Vec<mpsc::Sender<JobEvent>>>,
}

impl EventFanout {
    pub(crate) fn publish(&self, event: JobEvent) {
        // A poisoned lock only means a subscriber list update panicked; skip delivery.
        if let Ok(mut subs) = self.subscribers.lock() {
            // Drop any dead subscribers while publishing.
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub(crate) fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        Subscription { receiver: rx }
    }
}
