//! Reaction Scheduler
//!
//! Decides *when* reactions run. The only contract is that a scheduled task
//! runs on a later turn, never inside the call that scheduled it. That is
//! what makes `then` asynchronous even on an already settled value.
//!
//! The scheduler is injected: every deferred value holds a [`SchedulerRef`]
//! and derived values inherit it. Two implementations ship with the crate:
//!
//! - [`EventLoop`]: a deterministic FIFO queue driven by hand. Tests and
//!   single-threaded hosts use it.
//! - [`TokioScheduler`]: hands every task to a tokio runtime.

mod event_loop;
mod runtime;

use std::sync::Arc;

pub use event_loop::{EventLoop, EventLoopConfig};
pub use runtime::TokioScheduler;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Shared handle to a scheduler.
pub type SchedulerRef = Arc<dyn Scheduler>;

/// Runs tasks on a later turn of the host's execution loop.
pub trait Scheduler: Send + Sync {
    /// Enqueue `task`.
    ///
    /// Implementations must never run `task` before returning.
    fn schedule(&self, task: Task);
}
