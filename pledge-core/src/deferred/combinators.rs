//! Combinators
//!
//! Constructors and aggregators expressed purely in terms of executors,
//! settlers and `then` members:
//!
//! - [`Deferred::resolve`] and [`Deferred::reject`] settle at construction.
//! - [`Deferred::deferred`] hands out the settlers for outside control.
//! - [`Deferred::all`] collects every fulfilment in input order.
//! - [`Deferred::race`] adopts whichever item settles first.
//!
//! Items passed to `all` and `race` that are not thenable count as already
//! fulfilled with themselves.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::core::Deferred;
use super::state::Settler;
use crate::scheduler::SchedulerRef;
use crate::value::Value;

/// A deferred value together with its settlers.
///
/// Useful for settling from outside an executor, for example from an I/O
/// callback or a test.
#[derive(Debug, Clone)]
pub struct DeferredHandle {
    pub deferred: Deferred,
    pub fulfill: Settler,
    pub reject: Settler,
}

impl Deferred {
    /// A deferred value fulfilled with `value`.
    ///
    /// `value` is stored as is, even when it is thenable. It is unwrapped
    /// only once a handler returns it through `then`.
    pub fn resolve(scheduler: &SchedulerRef, value: impl Into<Value>) -> Deferred {
        let value = value.into();
        Deferred::new(scheduler, move |fulfill, _| {
            fulfill.call(value);
            Ok(())
        })
    }

    /// A deferred value rejected with `reason`.
    pub fn reject(scheduler: &SchedulerRef, reason: impl Into<Value>) -> Deferred {
        let reason = reason.into();
        Deferred::new(scheduler, move |_, reject| {
            reject.call(reason);
            Ok(())
        })
    }

    /// A pending deferred value and the settlers that control it.
    pub fn deferred(scheduler: &SchedulerRef) -> DeferredHandle {
        let deferred = Deferred::pending(scheduler.clone());
        let (fulfill, reject) = deferred.settlers();
        DeferredHandle {
            deferred,
            fulfill,
            reject,
        }
    }

    /// Fulfil with every item's value, in input order, once all fulfilled.
    ///
    /// Rejects with the first rejection reason without waiting for the
    /// remaining items. An empty input fulfils immediately with an empty
    /// list.
    pub fn all<I>(scheduler: &SchedulerRef, items: I) -> Deferred
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();

        Deferred::new(scheduler, move |fulfill, reject| {
            if items.is_empty() {
                fulfill.call(Value::List(Vec::new()));
                return Ok(());
            }

            let tally = Arc::new(Tally::new(items.len()));
            for (index, item) in items.into_iter().enumerate() {
                let on_item = {
                    let tally = Arc::clone(&tally);
                    let fulfill = fulfill.clone();
                    Settler::new(move |value| {
                        if let Some(results) = tally.record(index, value) {
                            fulfill.call(Value::List(results));
                        }
                    })
                };
                subscribe(item, on_item, reject.clone())?;
            }
            Ok(())
        })
    }

    /// Settle like whichever item settles first.
    ///
    /// Items that are already settled win in iteration order. Non-thenable
    /// items fulfil immediately, so the first one wins outright.
    pub fn race<I>(scheduler: &SchedulerRef, items: I) -> Deferred
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();

        Deferred::new(scheduler, move |fulfill, reject| {
            for item in items {
                subscribe(item, fulfill.clone(), reject.clone())?;
            }
            Ok(())
        })
    }
}

/// Route `item`'s outcome to the given settlers.
///
/// Thenables get the settlers passed to their `then` member; anything else
/// fulfils right away.
fn subscribe(item: Value, on_fulfilled: Settler, on_rejected: Settler) -> Result<(), Value> {
    match item.then_member()? {
        Some(then) => then(on_fulfilled, on_rejected),
        None => {
            on_fulfilled.call(item);
            Ok(())
        }
    }
}

/// Result slots for [`Deferred::all`].
///
/// Completion is decided by the number of filled slots, never by the
/// length of a growing collection, so items may finish in any order.
struct Tally {
    inner: Mutex<TallyState>,
}

struct TallyState {
    slots: Vec<Option<Value>>,
    remaining: usize,
}

impl Tally {
    fn new(len: usize) -> Self {
        Self {
            inner: Mutex::new(TallyState {
                slots: vec![None; len],
                remaining: len,
            }),
        }
    }

    /// Store the value for `index`.
    ///
    /// Returns the full result list once the last empty slot is filled. A
    /// second value for the same slot is ignored.
    fn record(&self, index: usize, value: Value) -> Option<Vec<Value>> {
        let mut state = self.inner.lock();
        let slot = state.slots.get_mut(index)?;
        if slot.is_some() {
            return None;
        }
        *slot = Some(value);
        state.remaining -= 1;
        trace!(index, remaining = state.remaining, "all: item fulfilled");

        if state.remaining > 0 {
            return None;
        }
        Some(state.slots.drain(..).flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::Status;
    use crate::error::Error;
    use crate::scheduler::EventLoop;

    fn setup() -> (EventLoop, SchedulerRef) {
        let event_loop = EventLoop::new();
        let scheduler = event_loop.handle();
        (event_loop, scheduler)
    }

    fn list(values: &[i64]) -> Value {
        Value::List(values.iter().copied().map(Value::from).collect())
    }

    #[test]
    fn resolve_and_reject_settle_at_construction() {
        let (_event_loop, scheduler) = setup();
        assert_eq!(Deferred::resolve(&scheduler, 1).value(), Some(Value::from(1)));
        assert_eq!(Deferred::reject(&scheduler, "x").reason(), Some(Value::from("x")));
    }

    #[test]
    fn resolve_does_not_unwrap_thenables() {
        let (_event_loop, scheduler) = setup();
        let inner = Deferred::resolve(&scheduler, 1);
        let outer = Deferred::resolve(&scheduler, inner.clone());

        assert_eq!(outer.value(), Some(Value::Deferred(inner)));
    }

    #[test]
    fn resolved_thenable_unwraps_through_then() {
        let (event_loop, scheduler) = setup();
        let inner = Deferred::resolve(&scheduler, 1);
        let unwrapped = Deferred::resolve(&scheduler, inner).on_fulfilled(Ok);

        event_loop.run_until_idle().unwrap();
        assert_eq!(unwrapped.value(), Some(Value::from(1)));
    }

    #[test]
    fn deferred_handle_settles_from_outside() {
        let (_event_loop, scheduler) = setup();
        let handle = Deferred::deferred(&scheduler);
        assert!(handle.deferred.is_pending());

        handle.reject.call("outside");
        handle.fulfill.call("ignored");
        assert_eq!(handle.deferred.reason(), Some(Value::from("outside")));
    }

    #[test]
    fn all_of_nothing_fulfills_immediately() {
        let (_event_loop, scheduler) = setup();
        let all = Deferred::all(&scheduler, Vec::<Value>::new());
        assert_eq!(all.value(), Some(Value::List(Vec::new())));
    }

    #[test]
    fn all_collects_in_order() {
        let (event_loop, scheduler) = setup();
        let items = vec![Deferred::resolve(&scheduler, 1), Deferred::resolve(&scheduler, 2)];
        let all = Deferred::all(&scheduler, items);

        event_loop.run_until_idle().unwrap();
        assert_eq!(all.value(), Some(list(&[1, 2])));
    }

    #[test]
    fn all_keeps_index_order_when_items_finish_out_of_order() {
        let (event_loop, scheduler) = setup();
        let first = Deferred::deferred(&scheduler);
        let second = Deferred::deferred(&scheduler);
        let all = Deferred::all(
            &scheduler,
            [first.deferred.clone(), second.deferred.clone()],
        );

        second.fulfill.call(2);
        event_loop.run_until_idle().unwrap();
        assert!(all.is_pending());

        first.fulfill.call(1);
        event_loop.run_until_idle().unwrap();
        assert_eq!(all.value(), Some(list(&[1, 2])));
    }

    #[test]
    fn all_treats_plain_items_as_fulfilled() {
        let (event_loop, scheduler) = setup();
        let all = Deferred::all(
            &scheduler,
            [Value::from(1), Deferred::resolve(&scheduler, 2).into(), Value::from(3)],
        );

        event_loop.run_until_idle().unwrap();
        assert_eq!(all.value(), Some(list(&[1, 2, 3])));
    }

    #[test]
    fn all_rejects_with_first_reason() {
        let (event_loop, scheduler) = setup();
        let never = Deferred::deferred(&scheduler);
        let all = Deferred::all(
            &scheduler,
            [
                Deferred::resolve(&scheduler, 1),
                Deferred::reject(&scheduler, "x"),
                never.deferred.clone(),
            ],
        );

        event_loop.run_until_idle().unwrap();
        assert_eq!(all.reason(), Some(Value::from("x")));
    }

    #[test]
    fn all_ignores_repeated_item_callbacks() {
        let (_event_loop, scheduler) = setup();
        let stutter = Value::thenable(|fulfill, _| {
            fulfill.call("a");
            fulfill.call("b");
            Ok(())
        });
        let pending = Deferred::deferred(&scheduler);

        // A repeated callback must not complete the second slot.
        let all = Deferred::all(&scheduler, [stutter, pending.deferred.clone().into()]);
        assert!(all.is_pending());
    }

    #[test]
    fn all_rejects_when_a_then_member_panics() {
        let (_event_loop, scheduler) = setup();
        let all = Deferred::all(
            &scheduler,
            [Value::thenable(|_, _| panic!("then exploded"))],
        );

        let reason = all.reason().expect("rejected");
        assert_eq!(reason.as_error(), Some(&Error::Panicked("then exploded".into())));
    }

    #[test]
    fn race_takes_first_settled() {
        let (event_loop, scheduler) = setup();
        let never = Deferred::deferred(&scheduler);
        let race = Deferred::race(
            &scheduler,
            [Deferred::resolve(&scheduler, 1), never.deferred.clone()],
        );

        event_loop.run_until_idle().unwrap();
        assert_eq!(race.value(), Some(Value::from(1)));
    }

    #[test]
    fn race_breaks_ties_in_iteration_order() {
        let (event_loop, scheduler) = setup();
        let race = Deferred::race(
            &scheduler,
            [Deferred::reject(&scheduler, "first"), Deferred::resolve(&scheduler, 2)],
        );

        event_loop.run_until_idle().unwrap();
        assert_eq!(race.status(), Status::Rejected);
        assert_eq!(race.reason(), Some(Value::from("first")));
    }

    #[test]
    fn race_plain_item_wins_immediately() {
        let (_event_loop, scheduler) = setup();
        let race = Deferred::race(
            &scheduler,
            [Deferred::resolve(&scheduler, 1).into(), Value::from("plain")],
        );

        assert_eq!(race.value(), Some(Value::from("plain")));
    }

    #[test]
    fn race_of_nothing_stays_pending() {
        let (event_loop, scheduler) = setup();
        let race = Deferred::race(&scheduler, Vec::<Value>::new());

        event_loop.run_until_idle().unwrap();
        assert!(race.is_pending());
    }

    #[test]
    fn tally_completes_only_when_every_slot_is_filled() {
        let tally = Tally::new(3);
        assert!(tally.record(2, Value::from(3)).is_none());
        assert!(tally.record(0, Value::from(1)).is_none());
        assert!(tally.record(2, Value::from(99)).is_none());
        assert_eq!(
            tally.record(1, Value::from(2)),
            Some(vec![Value::from(1), Value::from(2), Value::from(3)])
        );
    }
}
