//! Deferred Values
//!
//! This module implements the deferred-value primitive: a container for a
//! value that is not available yet, settled exactly once, with reactions
//! that always run on a later turn.
//!
//! # Concepts
//!
//! ## Settlement
//!
//! A deferred value starts pending and settles once, either fulfilled with a
//! value or rejected with a reason. Later settle calls are ignored.
//!
//! ## Reactions
//!
//! `then` attaches a fulfilment and a rejection handler and returns a new
//! deferred value driven by whichever handler runs. Handlers never run in
//! the call that attached them, even on an already settled value; they are
//! handed to the value's [`Scheduler`](crate::scheduler::Scheduler).
//!
//! ## Resolution
//!
//! A handler's result is unwrapped before it settles the derived value:
//! returning another deferred value or a foreign thenable makes the derived
//! value adopt its outcome. Returning the derived value itself is a cycle and
//! rejects.
//!
//! ## Combinators
//!
//! `resolve`, `reject`, `deferred`, `all` and `race` are built only from the
//! pieces above.

mod state;
mod core;
mod resolution;
mod combinators;
mod future;

pub use self::core::{Deferred, Handler};
pub use combinators::DeferredHandle;
pub use future::Settled;
pub use state::{Settler, Status};
