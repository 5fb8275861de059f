//! Pledge Core
//!
//! This crate provides the core runtime for Pledge, a deferred-value
//! primitive. It implements:
//!
//! - A settlement state machine (pending, then fulfilled or rejected, once)
//! - Chaining with `then`, `catch` and `finally`
//! - A resolution procedure that adopts nested deferred values and foreign
//!   thenables
//! - Pluggable reaction scheduling (manual event loop or tokio)
//! - Combinators: `resolve`, `reject`, `deferred`, `all`, `race`
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `deferred`: the primitive, its resolution procedure and combinators
//! - `scheduler`: the capability that runs reactions on a later turn
//! - `value`: the dynamic payload type and the thenable interop trait
//! - `error`: errors raised by the primitive itself
//!
//! # Example
//!
//! ```rust
//! use pledge_core::{Deferred, EventLoop, Value};
//!
//! let event_loop = EventLoop::new();
//! let scheduler = event_loop.handle();
//!
//! let handle = Deferred::deferred(&scheduler);
//! let total = Deferred::all(&scheduler, [
//!     Deferred::resolve(&scheduler, 1),
//!     handle.deferred.clone(),
//! ])
//! .on_fulfilled(|results| {
//!     let sum: i64 = results
//!         .as_list()
//!         .unwrap_or_default()
//!         .iter()
//!         .filter_map(Value::as_i64)
//!         .sum();
//!     Ok(Value::from(sum))
//! });
//!
//! handle.fulfill.call(41);
//! event_loop.run_until_idle().unwrap();
//! assert_eq!(total.value(), Some(Value::from(42)));
//! ```

pub mod deferred;
pub mod scheduler;
mod error;
mod value;

pub use deferred::{Deferred, DeferredHandle, Handler, Settled, Settler, Status};
pub use error::Error;
pub use scheduler::{EventLoop, EventLoopConfig, Scheduler, SchedulerRef, Task, TokioScheduler};
pub use value::{FnThenable, ThenFn, Thenable, Value};
