//! Deferred Value Implementation
//!
//! A [`Deferred`] is a handle to a value that is not available yet. It is
//! settled exactly once, through the settle functions handed to its
//! executor, and observers attach reactions with [`Deferred::then`].
//!
//! # How Chaining Works
//!
//! 1. `then` creates a new pending deferred value (the derived value).
//!
//! 2. If the receiver is still pending, one reaction is queued per outcome.
//!    Otherwise the matching reaction fires right away.
//!
//! 3. Firing a reaction never runs the handler: it hands a task to the
//!    receiver's scheduler. The handler runs on a later turn.
//!
//! 4. The handler's result goes through the resolution procedure, which is
//!    the only way a derived value gets settled. A handler that fails rejects
//!    the derived value instead.
//!
//! # Thread Safety
//!
//! State lives behind a `parking_lot::Mutex`. The lock is never held while
//! user code runs (executors, handlers, reactions, foreign `then` members),
//! so any of them may call back into the same deferred value.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::resolution;
use super::state::{Reaction, ReactionQueue, Settler, State, Status};
use crate::error::Error;
use crate::scheduler::SchedulerRef;
use crate::value::{ThenFn, Value};

/// Counter for generating unique deferred IDs.
static DEFERRED_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique deferred ID.
fn next_deferred_id() -> u64 {
    DEFERRED_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A fulfilment or rejection handler.
///
/// `Err` means the handler raised; the derived value rejects with it.
pub type Handler = Box<dyn FnOnce(Value) -> Result<Value, Value> + Send>;

struct Inner {
    id: u64,
    state: Mutex<State>,
    scheduler: SchedulerRef,
}

/// A value that settles once, with reactions that always run later.
///
/// Cloning is cheap and yields another handle to the same deferred value.
///
/// # Example
///
/// ```rust
/// use pledge_core::{Deferred, EventLoop, Value};
///
/// let event_loop = EventLoop::new();
/// let scheduler = event_loop.handle();
///
/// let doubled = Deferred::new(&scheduler, |fulfill, _reject| {
///     fulfill.call(21);
///     Ok(())
/// })
/// .on_fulfilled(|v| Ok(Value::from(v.as_i64().unwrap_or_default() * 2)));
///
/// // Nothing runs until the loop turns.
/// assert!(doubled.is_pending());
/// event_loop.run_until_idle().unwrap();
/// assert_eq!(doubled.value(), Some(Value::from(42)));
/// ```
#[derive(Clone)]
pub struct Deferred {
    inner: Arc<Inner>,
}

impl Deferred {
    /// Create a deferred value and run `executor` synchronously.
    ///
    /// The executor receives the fulfil and reject settlers. Returning
    /// `Err(reason)`, or panicking, rejects the deferred value unless one of
    /// the settlers was already called.
    pub fn new<F>(scheduler: &SchedulerRef, executor: F) -> Self
    where
        F: FnOnce(Settler, Settler) -> Result<(), Value>,
    {
        let deferred = Self::pending(scheduler.clone());
        let (fulfill, reject) = deferred.settlers();

        match panic::catch_unwind(AssertUnwindSafe(move || executor(fulfill, reject))) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                deferred.settle_rejected(reason);
            }
            Err(payload) => {
                let error = Error::from_panic(payload);
                debug!(deferred = deferred.id(), %error, "executor panicked");
                deferred.settle_rejected(error.into());
            }
        }

        deferred
    }

    /// Create a pending deferred value with no executor.
    pub(crate) fn pending(scheduler: SchedulerRef) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: next_deferred_id(),
                state: Mutex::new(State::new()),
                scheduler,
            }),
        }
    }

    /// The fulfil and reject settlers for this deferred value.
    pub(crate) fn settlers(&self) -> (Settler, Settler) {
        let on_fulfill = self.clone();
        let on_reject = self.clone();
        (
            Settler::new(move |value| {
                on_fulfill.settle_fulfilled(value);
            }),
            Settler::new(move |reason| {
                on_reject.settle_rejected(reason);
            }),
        )
    }

    /// Get the deferred value's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The scheduler that runs this deferred value's reactions.
    pub fn scheduler(&self) -> &SchedulerRef {
        &self.inner.scheduler
    }

    pub fn status(&self) -> Status {
        self.inner.state.lock().status()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    /// The fulfilment value, if fulfilled.
    pub fn value(&self) -> Option<Value> {
        match &*self.inner.state.lock() {
            State::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection reason, if rejected.
    pub fn reason(&self) -> Option<Value> {
        match &*self.inner.state.lock() {
            State::Rejected(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Whether both handles point at the same deferred value.
    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Settle as fulfilled. Returns `false` if already settled.
    pub(crate) fn settle_fulfilled(&self, value: Value) -> bool {
        let drained = self.inner.state.lock().fulfill(value.clone());
        self.run_reactions(drained, value, Status::Fulfilled)
    }

    /// Settle as rejected. Returns `false` if already settled.
    pub(crate) fn settle_rejected(&self, reason: Value) -> bool {
        let drained = self.inner.state.lock().reject(reason.clone());
        self.run_reactions(drained, reason, Status::Rejected)
    }

    fn run_reactions(
        &self,
        drained: Option<ReactionQueue>,
        payload: Value,
        status: Status,
    ) -> bool {
        let Some(reactions) = drained else {
            trace!(deferred = self.id(), ?status, "ignoring settle call on settled deferred");
            return false;
        };

        trace!(
            deferred = self.id(),
            ?status,
            reactions = reactions.len(),
            "settled"
        );
        for reaction in reactions {
            reaction(payload.clone());
        }
        true
    }

    /// Attach handlers and derive a new deferred value from their outcome.
    ///
    /// A missing `on_fulfilled` passes the value through. A missing
    /// `on_rejected` also passes its input through, which turns a rejection
    /// into a fulfilment of the derived value.
    pub fn then_boxed(
        &self,
        on_fulfilled: Option<Handler>,
        on_rejected: Option<Handler>,
    ) -> Deferred {
        let on_fulfilled = on_fulfilled.unwrap_or_else(pass_through);
        let on_rejected = on_rejected.unwrap_or_else(pass_through);

        let derived = Deferred::pending(self.inner.scheduler.clone());
        let fulfill_reaction = self.reaction(&derived, on_fulfilled);
        let reject_reaction = self.reaction(&derived, on_rejected);

        let (reaction, input) = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Pending {
                    fulfill_reactions,
                    reject_reactions,
                } => {
                    fulfill_reactions.push(fulfill_reaction);
                    reject_reactions.push(reject_reaction);
                    return derived;
                }
                State::Fulfilled(value) => (fulfill_reaction, value.clone()),
                State::Rejected(reason) => (reject_reaction, reason.clone()),
            }
        };

        reaction(input);
        derived
    }

    /// Attach a fulfilment and a rejection handler.
    pub fn then<F, R>(&self, on_fulfilled: F, on_rejected: R) -> Deferred
    where
        F: FnOnce(Value) -> Result<Value, Value> + Send + 'static,
        R: FnOnce(Value) -> Result<Value, Value> + Send + 'static,
    {
        self.then_boxed(Some(Box::new(on_fulfilled)), Some(Box::new(on_rejected)))
    }

    /// Attach only a fulfilment handler.
    pub fn on_fulfilled<F>(&self, on_fulfilled: F) -> Deferred
    where
        F: FnOnce(Value) -> Result<Value, Value> + Send + 'static,
    {
        self.then_boxed(Some(Box::new(on_fulfilled)), None)
    }

    /// Attach only a rejection handler.
    pub fn catch<R>(&self, on_rejected: R) -> Deferred
    where
        R: FnOnce(Value) -> Result<Value, Value> + Send + 'static,
    {
        self.then_boxed(None, Some(Box::new(on_rejected)))
    }

    /// Run `on_settled` once, whatever the outcome.
    ///
    /// The derived value settles exactly like this one: the value stays a
    /// fulfilment and the reason stays a rejection. If `on_settled` panics,
    /// the derived value rejects with the panic instead.
    pub fn finally<F>(&self, on_settled: F) -> Deferred
    where
        F: FnOnce() + Send + 'static,
    {
        let on_fulfilled_slot = Arc::new(Mutex::new(Some(on_settled)));
        let on_rejected_slot = Arc::clone(&on_fulfilled_slot);

        self.then(
            move |value| {
                run_once(&on_fulfilled_slot);
                Ok(value)
            },
            move |reason| {
                run_once(&on_rejected_slot);
                Err(reason)
            },
        )
    }

    /// This deferred value's `then` member, for the resolution procedure and
    /// the combinators.
    pub(crate) fn then_fn(&self) -> ThenFn {
        let this = self.clone();
        Arc::new(move |on_fulfilled: Settler, on_rejected: Settler| {
            this.then(
                move |value| {
                    on_fulfilled.call(value);
                    Ok(Value::undefined())
                },
                move |reason| {
                    on_rejected.call(reason);
                    Ok(Value::undefined())
                },
            );
            Ok(())
        })
    }

    /// Build the reaction that schedules `handler` and settles `derived`.
    fn reaction(&self, derived: &Deferred, handler: Handler) -> Reaction {
        let derived = derived.clone();
        let scheduler = self.inner.scheduler.clone();
        let source = self.id();

        Box::new(move |input| {
            trace!(deferred = source, derived = derived.id(), "scheduling reaction");
            scheduler.schedule(Box::new(move || derived.run_handler(handler, input)));
        })
    }

    /// Run a handler on a later turn and feed its outcome into this value.
    fn run_handler(&self, handler: Handler, input: Value) {
        match panic::catch_unwind(AssertUnwindSafe(move || handler(input))) {
            Ok(Ok(result)) => resolution::resolve_against(self, result),
            Ok(Err(reason)) => {
                self.settle_rejected(reason);
            }
            Err(payload) => {
                let error = Error::from_panic(payload);
                debug!(deferred = self.id(), %error, "handler panicked");
                self.settle_rejected(error.into());
            }
        }
    }
}

fn pass_through() -> Handler {
    Box::new(|value: Value| -> Result<Value, Value> { Ok(value) })
}

fn run_once<F: FnOnce()>(slot: &Mutex<Option<F>>) {
    let callback = slot.lock().take();
    if let Some(callback) = callback {
        callback();
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Copied out so the lock is not held while the payload is formatted.
        let (status, payload) = {
            let state = self.inner.state.lock();
            let payload = match &*state {
                State::Fulfilled(payload) | State::Rejected(payload) => Some(payload.clone()),
                State::Pending { .. } => None,
            };
            (state.status(), payload)
        };

        let mut debug = f.debug_struct("Deferred");
        debug.field("id", &self.inner.id).field("status", &status);
        if let Some(payload) = &payload {
            debug.field("payload", payload);
        }
        debug.finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
