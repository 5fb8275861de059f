//! Payloads carried by deferred values.
//!
//! A deferred value's fulfilment value or rejection reason can be anything,
//! so payloads are modelled as a small dynamic [`Value`] enum. Plain data is
//! stored as a `serde_json::Value`; `Null` doubles as "no value".
//!
//! # Thenables
//!
//! Interop with foreign deferred-value implementations goes through the
//! [`Thenable`] capability. Anything stored as [`Value::Object`] is asked for
//! its `then` member exactly once when it flows through the resolution
//! procedure:
//!
//! - `Err(reason)`: reading the member failed, the target rejects.
//! - `Ok(None)`: not thenable, the object itself becomes the fulfilment value.
//! - `Ok(Some(then))`: `then` is invoked with a fulfil and a reject callback.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::deferred::{Deferred, Settler};
use crate::error::Error;

/// A callable `then` member: receives the fulfil and reject callbacks.
///
/// Returning `Err` is the equivalent of `then` raising.
pub type ThenFn = Arc<dyn Fn(Settler, Settler) -> Result<(), Value> + Send + Sync>;

/// An object that may expose a callable `then` member.
pub trait Thenable: Send + Sync + fmt::Debug {
    /// Look up the `then` member.
    ///
    /// Called at most once per resolution attempt.
    fn then_member(&self) -> Result<Option<ThenFn>, Value>;
}

/// A thenable backed by a closure.
pub struct FnThenable {
    then: ThenFn,
}

impl FnThenable {
    /// Create a thenable whose `then` member is `then`.
    pub fn new<F>(then: F) -> Self
    where
        F: Fn(Settler, Settler) -> Result<(), Value> + Send + Sync + 'static,
    {
        Self {
            then: Arc::new(then),
        }
    }
}

impl fmt::Debug for FnThenable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnThenable").finish_non_exhaustive()
    }
}

impl Thenable for FnThenable {
    fn then_member(&self) -> Result<Option<ThenFn>, Value> {
        Ok(Some(Arc::clone(&self.then)))
    }
}

/// A fulfilment value or rejection reason.
#[derive(Clone)]
pub enum Value {
    /// Plain data.
    Data(Json),

    /// An ordered sequence, as produced by [`Deferred::all`].
    List(Vec<Value>),

    /// An error raised by the primitive itself.
    Error(Arc<Error>),

    /// An object that may be thenable.
    Object(Arc<dyn Thenable>),

    /// Another deferred value.
    Deferred(Deferred),
}

impl Value {
    /// The "no value" payload passed around by handlers that return nothing.
    pub fn undefined() -> Self {
        Value::Data(Json::Null)
    }

    /// Wrap a closure as a foreign thenable.
    pub fn thenable<F>(then: F) -> Self
    where
        F: Fn(Settler, Settler) -> Result<(), Value> + Send + Sync + 'static,
    {
        Value::Object(Arc::new(FnThenable::new(then)))
    }

    /// Wrap any [`Thenable`] implementation.
    pub fn object<T>(object: T) -> Self
    where
        T: Thenable + 'static,
    {
        Value::Object(Arc::new(object))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Data(Json::Null))
    }

    pub fn as_data(&self) -> Option<&Json> {
        match self {
            Value::Data(json) => Some(json),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_data().and_then(Json::as_i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_data().and_then(Json::as_str)
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&Error> {
        match self {
            Value::Error(error) => Some(error),
            _ => None,
        }
    }

    pub fn as_deferred(&self) -> Option<&Deferred> {
        match self {
            Value::Deferred(deferred) => Some(deferred),
            _ => None,
        }
    }

    /// Look up a callable `then` member.
    ///
    /// Deferred values always have one; objects are asked; everything else
    /// is a plain value.
    pub(crate) fn then_member(&self) -> Result<Option<ThenFn>, Value> {
        match self {
            Value::Deferred(deferred) => Ok(Some(deferred.then_fn())),
            Value::Object(object) => object.then_member(),
            Value::Data(_) | Value::List(_) | Value::Error(_) => Ok(None),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::undefined()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Data(a), Value::Data(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Deferred(a), Value::Deferred(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Data(json) => write!(f, "{json}"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Error(error) => write!(f, "Error({error})"),
            Value::Object(object) => fmt::Debug::fmt(object, f),
            // Identity only: a settled payload may point back at its holder.
            Value::Deferred(deferred) => write!(f, "Deferred#{}", deferred.id()),
        }
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Value::Data(json)
    }
}

impl From<Error> for Value {
    fn from(error: Error) -> Self {
        Value::Error(Arc::new(error))
    }
}

impl From<Deferred> for Value {
    fn from(deferred: Deferred) -> Self {
        Value::Deferred(deferred)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::undefined()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Data(Json::from(s))
    }
}

macro_rules! value_from_json {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Data(Json::from(v))
                }
            }
        )*
    };
}

value_from_json!(bool, i32, i64, u32, u64, f64, String);
