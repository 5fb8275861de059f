//! Await Bridge
//!
//! Lets async code wait on a deferred value with `.await`. The future
//! attaches one reaction pair through `then`, so it completes only after the
//! scheduler has run that reaction. On a [`TokioScheduler`] that happens on
//! its own; on an [`EventLoop`] the loop has to be driven.
//!
//! [`TokioScheduler`]: crate::scheduler::TokioScheduler
//! [`EventLoop`]: crate::scheduler::EventLoop

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::task::AtomicWaker;
use parking_lot::Mutex;

use super::core::Deferred;
use crate::value::Value;

/// Future returned by awaiting a [`Deferred`].
///
/// Resolves to `Ok(value)` on fulfilment and `Err(reason)` on rejection.
pub struct Settled {
    shared: Arc<Shared>,
}

struct Shared {
    outcome: Mutex<Option<Result<Value, Value>>>,
    waker: AtomicWaker,
}

impl Shared {
    fn complete(&self, outcome: Result<Value, Value>) {
        *self.outcome.lock() = Some(outcome);
        self.waker.wake();
    }

    fn take(&self) -> Option<Result<Value, Value>> {
        self.outcome.lock().take()
    }
}

impl Settled {
    fn new(deferred: &Deferred) -> Self {
        let shared = Arc::new(Shared {
            outcome: Mutex::new(None),
            waker: AtomicWaker::new(),
        });

        let on_fulfilled = Arc::clone(&shared);
        let on_rejected = Arc::clone(&shared);
        deferred.then(
            move |value| {
                on_fulfilled.complete(Ok(value));
                Ok(Value::undefined())
            },
            move |reason| {
                on_rejected.complete(Err(reason));
                Ok(Value::undefined())
            },
        );

        Self { shared }
    }
}

impl Future for Settled {
    type Output = Result<Value, Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.shared.take() {
            return Poll::Ready(outcome);
        }

        self.shared.waker.register(cx.waker());

        // The reaction may have completed between the check and the register.
        match self.shared.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl IntoFuture for Deferred {
    type Output = Result<Value, Value>;
    type IntoFuture = Settled;

    fn into_future(self) -> Self::IntoFuture {
        Settled::new(&self)
    }
}
