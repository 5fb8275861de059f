//! Tokio-backed scheduler.
//!
//! A [`TokioScheduler`] owns one driver task on the runtime. Scheduled tasks
//! are sent to that driver over an unbounded channel and run one at a time
//! in arrival order, so reactions keep their FIFO order even on a
//! multi-threaded runtime. Sending never runs a task inline, so the "later
//! turn" contract holds.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{trace, warn};

use super::{Scheduler, SchedulerRef, Task};
use crate::error::Error;

/// Schedules reactions onto a tokio runtime.
///
/// Clones share the same driver task and therefore the same queue.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    sender: UnboundedSender<Task>,
}

impl TokioScheduler {
    /// Spawn a driver task on `handle` and schedule onto it.
    pub fn new(handle: Handle) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(drive(receiver));
        Self { sender }
    }

    /// Use the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like
    /// [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Like [`TokioScheduler::current`], but returns `None` outside a runtime.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Wrap into a shareable [`SchedulerRef`].
    pub fn into_ref(self) -> SchedulerRef {
        Arc::new(self)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Task) {
        trace!("queueing reaction for tokio driver");
        if self.sender.send(task).is_err() {
            warn!("tokio driver has stopped, dropping scheduled task");
        }
    }
}

/// Run tasks in arrival order until every sender is gone.
async fn drive(mut receiver: UnboundedReceiver<Task>) {
    while let Some(task) = receiver.recv().await {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            let error = Error::from_panic(payload);
            warn!(%error, "scheduled task panicked");
        }
    }
    trace!("tokio driver finished");
}
