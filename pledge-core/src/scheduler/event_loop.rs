//! Event Loop
//!
//! A manually driven task queue. Tasks run in the order they were
//! scheduled; tasks scheduled while the loop is draining join the back of
//! the queue.
//!
//! # Turns
//!
//! [`EventLoop::run_turn`] runs only the tasks that were queued when the
//! turn started. [`EventLoop::run_until_idle`] keeps going until the queue is
//! empty, which is what most callers want.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{trace, warn};

use super::{Scheduler, SchedulerRef, Task};
use crate::error::Error;

/// Settings for an [`EventLoop`].
///
/// Deserializable, so it can live in a host's configuration file.
///
/// ```rust
/// use pledge_core::scheduler::EventLoopConfig;
///
/// let config: EventLoopConfig = serde_json::from_str(r#"{ "turn_limit": 1000 }"#).unwrap();
/// assert_eq!(config.turn_limit, Some(1000));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventLoopConfig {
    /// Maximum number of tasks one `run_until_idle` call may run.
    ///
    /// Guards against reactions that keep scheduling more work forever.
    /// `None` means no limit.
    pub turn_limit: Option<usize>,
}

/// The queue shared between the loop and every deferred value using it.
#[derive(Default)]
struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl Scheduler for TaskQueue {
    fn schedule(&self, task: Task) {
        let mut tasks = self.tasks.lock();
        tasks.push_back(task);
        trace!(pending = tasks.len(), "task scheduled");
    }
}

/// A deterministic, manually driven scheduler.
pub struct EventLoop {
    queue: Arc<TaskQueue>,
    config: EventLoopConfig,
}

impl EventLoop {
    /// Create an event loop with no turn limit.
    pub fn new() -> Self {
        Self::with_config(EventLoopConfig::default())
    }

    pub fn with_config(config: EventLoopConfig) -> Self {
        Self {
            queue: Arc::new(TaskQueue::default()),
            config,
        }
    }

    pub fn config(&self) -> &EventLoopConfig {
        &self.config
    }

    /// A scheduler handle that feeds this loop.
    pub fn handle(&self) -> SchedulerRef {
        self.queue.clone()
    }

    /// Number of tasks waiting to run.
    pub fn pending_tasks(&self) -> usize {
        self.queue.tasks.lock().len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending_tasks() == 0
    }

    /// Run the tasks queued before this call. Returns how many ran.
    pub fn run_turn(&self) -> usize {
        let batch = std::mem::take(&mut *self.queue.tasks.lock());
        let ran = batch.len();
        for task in batch {
            task();
        }
        ran
    }

    /// Run tasks until the queue is empty. Returns how many ran.
    ///
    /// Fails with [`Error::TurnLimitExceeded`] if the configured limit is
    /// reached while tasks are still queued. The remaining tasks stay queued.
    pub fn run_until_idle(&self) -> Result<usize, Error> {
        let mut ran = 0;
        loop {
            if let Some(limit) = self.config.turn_limit {
                if ran >= limit && !self.is_idle() {
                    warn!(limit, pending = self.pending_tasks(), "event loop turn limit reached");
                    return Err(Error::TurnLimitExceeded { limit });
                }
            }

            let next = self.queue.tasks.lock().pop_front();
            let Some(task) = next else {
                return Ok(ran);
            };
            task();
            ran += 1;
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending_tasks", &self.pending_tasks())
            .field("config", &self.config)
            .finish()
    }
}
