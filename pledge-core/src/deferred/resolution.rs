//! Resolution Procedure
//!
//! Drives a derived deferred value toward settlement from a handler's
//! result. The result may be:
//!
//! - the target itself, which is a cycle and rejects with [`Error::Cycle`],
//! - another deferred value or a foreign thenable, whose eventual outcome is
//!   adopted (recursively, so nested thenables unwrap all the way down),
//! - anything else, which fulfils the target as is.
//!
//! A foreign `then` may call its callbacks synchronously, later, or more than
//! once, and may fail after calling them. A single-use [`Latch`] per
//! resolution attempt makes sure only the first callback counts.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::core::Deferred;
use super::state::Settler;
use crate::error::Error;
use crate::value::{ThenFn, Value};

/// A flag that can be tripped exactly once.
///
/// Callbacks handed to a foreign `then` may run on any thread when the
/// scheduler is multi-threaded, so the flag is atomic.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    fired: AtomicBool,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Trip the latch. Returns `true` only for the first caller.
    pub(crate) fn try_fire(&self) -> bool {
        !self.fired.swap(true, Ordering::AcqRel)
    }
}

/// Settle `target` according to `result`.
pub(crate) fn resolve_against(target: &Deferred, result: Value) {
    if let Value::Deferred(candidate) = &result {
        if candidate.ptr_eq(target) {
            debug!(deferred = target.id(), "rejecting resolution with itself");
            target.settle_rejected(Error::Cycle.into());
            return;
        }
    }

    let then = match read_then(&result) {
        Ok(Some(then)) => then,
        Ok(None) => {
            target.settle_fulfilled(result);
            return;
        }
        Err(reason) => {
            target.settle_rejected(reason);
            return;
        }
    };

    let latch = Arc::new(Latch::new());

    let on_fulfilled = {
        let target = target.clone();
        let latch = Arc::clone(&latch);
        Settler::new(move |inner| {
            if latch.try_fire() {
                resolve_against(&target, inner);
            }
        })
    };

    let on_rejected = {
        let target = target.clone();
        let latch = Arc::clone(&latch);
        Settler::new(move |reason| {
            if latch.try_fire() {
                target.settle_rejected(reason);
            }
        })
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| then(on_fulfilled, on_rejected)))
        .unwrap_or_else(|payload| Err(Error::from_panic(payload).into()));

    if let Err(reason) = outcome {
        if latch.try_fire() {
            target.settle_rejected(reason);
        } else {
            debug!(
                deferred = target.id(),
                ?reason,
                "ignoring failure raised after the thenable settled"
            );
        }
    }
}

/// Read the `then` member once. A panicking read counts as a failed read.
fn read_then(result: &Value) -> Result<Option<ThenFn>, Value> {
    panic::catch_unwind(AssertUnwindSafe(|| result.then_member()))
        .unwrap_or_else(|payload| Err(Error::from_panic(payload).into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::Status;
    use crate::scheduler::EventLoop;
    use crate::value::Thenable;
    use std::sync::atomic::AtomicUsize;

    fn pending_target() -> (EventLoop, Deferred) {
        let event_loop = EventLoop::new();
        let target = Deferred::pending(event_loop.handle());
        (event_loop, target)
    }

    #[test]
    fn latch_fires_once() {
        let latch = Latch::new();
        assert!(latch.try_fire());
        assert!(!latch.try_fire());
        assert!(!latch.try_fire());
    }

    #[test]
    fn plain_value_fulfills_immediately() {
        let (_event_loop, target) = pending_target();
        resolve_against(&target, Value::from(3));
        assert_eq!(target.value(), Some(Value::from(3)));
    }

    #[test]
    fn self_resolution_rejects_with_cycle() {
        let (_event_loop, target) = pending_target();
        resolve_against(&target, Value::Deferred(target.clone()));

        let reason = target.reason().expect("rejected");
        assert_eq!(reason.as_error(), Some(&Error::Cycle));
    }

    #[test]
    fn synchronous_thenable_is_adopted() {
        let (_event_loop, target) = pending_target();
        let thenable = Value::thenable(|fulfill, _| {
            fulfill.call("adopted");
            Ok(())
        });

        resolve_against(&target, thenable);
        assert_eq!(target.value(), Some(Value::from("adopted")));
    }

    #[test]
    fn only_first_callback_counts() {
        let (_event_loop, target) = pending_target();
        let thenable = Value::thenable(|fulfill, reject| {
            fulfill.call(1);
            fulfill.call(2);
            reject.call("late");
            Ok(())
        });

        resolve_against(&target, thenable);
        assert_eq!(target.value(), Some(Value::from(1)));
    }

    #[test]
    fn failure_after_callback_is_ignored() {
        let (_event_loop, target) = pending_target();
        let thenable = Value::thenable(|fulfill, _| {
            fulfill.call("kept");
            Err(Value::from("thrown afterwards"))
        });

        resolve_against(&target, thenable);
        assert_eq!(target.value(), Some(Value::from("kept")));
    }

    #[test]
    fn failing_then_rejects() {
        let (_event_loop, target) = pending_target();
        resolve_against(&target, Value::thenable(|_, _| Err(Value::from("thrown"))));
        assert_eq!(target.reason(), Some(Value::from("thrown")));
    }

    #[test]
    fn panicking_then_rejects() {
        let (_event_loop, target) = pending_target();
        resolve_against(&target, Value::thenable(|_, _| panic!("then blew up")));

        let reason = target.reason().expect("rejected");
        assert_eq!(reason.as_error(), Some(&Error::Panicked("then blew up".into())));
    }

    #[test]
    fn failing_then_read_rejects() {
        #[derive(Debug)]
        struct Trap;

        impl Thenable for Trap {
            fn then_member(&self) -> Result<Option<ThenFn>, Value> {
                Err(Value::from("read failed"))
            }
        }

        let (_event_loop, target) = pending_target();
        resolve_against(&target, Value::object(Trap));
        assert_eq!(target.reason(), Some(Value::from("read failed")));
    }

    #[test]
    fn then_member_is_read_once() {
        #[derive(Debug, Default)]
        struct Counting {
            reads: AtomicUsize,
        }

        impl Thenable for Counting {
            fn then_member(&self) -> Result<Option<ThenFn>, Value> {
                self.reads.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        }

        let (_event_loop, target) = pending_target();
        let object = Arc::new(Counting::default());
        resolve_against(&target, Value::Object(object.clone()));

        assert_eq!(object.reads.load(Ordering::SeqCst), 1);
        // Not thenable: the object itself is the fulfilment value.
        assert_eq!(target.status(), Status::Fulfilled);
        assert_eq!(target.value(), Some(Value::Object(object)));
    }

    #[test]
    fn nested_thenables_unwrap_recursively() {
        let (_event_loop, target) = pending_target();
        let innermost = Value::thenable(|fulfill, _| {
            fulfill.call("deep");
            Ok(())
        });
        let outer = Value::thenable(move |fulfill, _| {
            let middle = innermost.clone();
            fulfill.call(Value::thenable(move |fulfill, _| {
                fulfill.call(middle.clone());
                Ok(())
            }));
            Ok(())
        });

        resolve_against(&target, outer);
        assert_eq!(target.value(), Some(Value::from("deep")));
    }

    #[test]
    fn asynchronous_thenable_callback_settles_later() {
        let (_event_loop, target) = pending_target();
        let stash = Arc::new(parking_lot::Mutex::new(None));
        let stash_clone = stash.clone();

        resolve_against(
            &target,
            Value::thenable(move |fulfill, _| {
                *stash_clone.lock() = Some(fulfill);
                Ok(())
            }),
        );
        assert!(target.is_pending());

        let fulfill: Settler = stash.lock().take().expect("then was invoked");
        fulfill.call(11);
        fulfill.call(12);
        assert_eq!(target.value(), Some(Value::from(11)));
    }

    #[test]
    fn deferred_result_is_adopted_on_a_later_turn() {
        let (event_loop, target) = pending_target();
        let source = Deferred::resolve(target.scheduler(), "from deferred");

        resolve_against(&target, Value::Deferred(source));
        assert!(target.is_pending());

        event_loop.run_until_idle().unwrap();
        assert_eq!(target.value(), Some(Value::from("from deferred")));
    }
}
