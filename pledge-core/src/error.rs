//! Error types for Pledge.
//!
//! Almost every failure inside the primitive is reported by rejecting a
//! deferred value, so these errors usually travel as a rejection reason
//! wrapped in [`Value::Error`](crate::Value::Error). The event loop's turn
//! limit is the exception: it is returned directly from
//! [`EventLoop::run_until_idle`](crate::scheduler::EventLoop::run_until_idle).

use std::any::Any;

use thiserror::Error;

/// Core Pledge errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A handler returned the very deferred value its result would settle.
    #[error("chaining cycle detected: a deferred value cannot be resolved with itself")]
    Cycle,

    /// An executor, handler, or foreign `then` panicked.
    #[error("panicked: {0}")]
    Panicked(String),

    /// The event loop ran more tasks than its configured limit allows.
    #[error("event loop exceeded its turn limit of {limit} tasks")]
    TurnLimitExceeded { limit: usize },
}

impl Error {
    /// Build a [`Error::Panicked`] from a payload caught by `catch_unwind`.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Error::Panicked(message)
    }
}
