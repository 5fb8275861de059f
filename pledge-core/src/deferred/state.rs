//! Settlement State Machine
//!
//! Every deferred value starts out pending and settles exactly once, either
//! fulfilled with a value or rejected with a reason. While pending it keeps
//! two queues of reactions, one per outcome. Settling swaps the state and
//! hands back the queue matching the outcome so the caller can run it after
//! releasing the lock; the other queue is dropped with the old state.
//!
//! Holding status, value and reason in one enum means only the payload that
//! matches the status can exist at any time.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::value::Value;

/// A callback waiting for its deferred value to settle.
///
/// It receives the settled value or reason.
pub(crate) type Reaction = Box<dyn FnOnce(Value) + Send>;

/// Most deferred values carry one or two reactions per outcome.
pub(crate) type ReactionQueue = SmallVec<[Reaction; 2]>;

/// Where a deferred value is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Not settled yet. Reactions are queued.
    Pending,

    /// Settled with a value.
    Fulfilled,

    /// Settled with a reason.
    Rejected,
}

impl Status {
    pub fn is_settled(self) -> bool {
        self != Status::Pending
    }
}

/// The mutable part of a deferred value.
pub(crate) enum State {
    Pending {
        fulfill_reactions: ReactionQueue,
        reject_reactions: ReactionQueue,
    },
    Fulfilled(Value),
    Rejected(Value),
}

impl State {
    pub(crate) fn new() -> Self {
        State::Pending {
            fulfill_reactions: SmallVec::new(),
            reject_reactions: SmallVec::new(),
        }
    }

    pub(crate) fn status(&self) -> Status {
        match self {
            State::Pending { .. } => Status::Pending,
            State::Fulfilled(_) => Status::Fulfilled,
            State::Rejected(_) => Status::Rejected,
        }
    }

    /// Settle as fulfilled.
    ///
    /// Returns the fulfil reactions to run, or `None` if already settled.
    pub(crate) fn fulfill(&mut self, value: Value) -> Option<ReactionQueue> {
        self.settle(State::Fulfilled(value))
    }

    /// Settle as rejected.
    ///
    /// Returns the reject reactions to run, or `None` if already settled.
    pub(crate) fn reject(&mut self, reason: Value) -> Option<ReactionQueue> {
        self.settle(State::Rejected(reason))
    }

    fn settle(&mut self, next: State) -> Option<ReactionQueue> {
        if self.status().is_settled() {
            return None;
        }

        let fulfilled = matches!(next, State::Fulfilled(_));
        match std::mem::replace(self, next) {
            State::Pending {
                fulfill_reactions,
                reject_reactions,
            } => Some(if fulfilled {
                fulfill_reactions
            } else {
                reject_reactions
            }),
            State::Fulfilled(_) | State::Rejected(_) => None,
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Pending {
                fulfill_reactions,
                reject_reactions,
            } => f
                .debug_struct("Pending")
                .field("fulfill_reactions", &fulfill_reactions.len())
                .field("reject_reactions", &reject_reactions.len())
                .finish(),
            State::Fulfilled(value) => f.debug_tuple("Fulfilled").field(value).finish(),
            State::Rejected(reason) => f.debug_tuple("Rejected").field(reason).finish(),
        }
    }
}

/// A settle function: fulfils or rejects one deferred value.
///
/// Settlers are cheap to clone and may be called any number of times; only
/// the first call on a pending deferred value has an effect.
#[derive(Clone)]
pub struct Settler {
    settle: Arc<dyn Fn(Value) + Send + Sync>,
}

impl Settler {
    /// Wrap a settle callback.
    pub fn new<F>(settle: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Self {
            settle: Arc::new(settle),
        }
    }

    /// Invoke the settle callback.
    pub fn call(&self, value: impl Into<Value>) {
        (self.settle)(value.into());
    }
}

impl fmt::Debug for Settler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler").finish_non_exhaustive()
    }
}
