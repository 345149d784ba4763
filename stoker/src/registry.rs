//! Registry of in-process callables
//!
//! Binds a textual name to a callable handle plus the introspection data
//! the binder and the reconciler need. The table is owned by the host and
//! built before the scheduler starts admitting work; tests create a fresh
//! table per case.

use std::error::Error as StdError;
use std::panic::AssertUnwindSafe;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::binder::{Frame, FromFrame, InputSpec};
use crate::error::{Error, ErrorKind, panic_message};

pub use handler::{BlockingHandler, IntoOutcome, TaskHandler};

use handler::{BlockingFunc, CallableFunc, RegisteredHandler};

pub mod handler;

/// The error payload produced when a callable invocation does not yield a
/// result: a raised error, a failed binding, a panic or an unresolved name.
///
/// Written verbatim into the execution artifact; the job itself still
/// counts as `completed` because the scheduled unit ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallError {
    /// The error type name.
    pub r#type: String,

    /// A human-readable message.
    pub message: String,

    /// The rendered error chain; never empty.
    pub traceback: String,
}

impl CallError {
    /// Creates a new [`CallError`]
    pub fn new(r#type: impl Into<String>, message: impl Into<String>) -> Self {
        let r#type = r#type.into();
        let message = message.into();
        let traceback = format!("{}: {}", r#type, message);
        Self { r#type, message, traceback }
    }

    /// Renders a concrete error type, walking its source chain
    pub(crate) fn from_std<E: StdError>(err: &E) -> Self {
        let name = short_type_name::<E>();
        let mut traceback = format!("{name}: {err}");
        let mut source = err.source();
        while let Some(cause) = source {
            traceback.push_str("\n  caused by: ");
            traceback.push_str(&cause.to_string());
            source = cause.source();
        }
        Self {
            r#type: name.into(),
            message: err.to_string(),
            traceback,
        }
    }

    /// Renders a caught panic payload
    pub(crate) fn panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = panic_message(payload);
        Self {
            r#type: "panic".into(),
            traceback: format!("panic: {message}"),
            message,
        }
    }
}

impl From<Error> for CallError {
    fn from(err: Error) -> Self {
        Self {
            r#type: err.kind().as_str().into(),
            message: err.to_string(),
            traceback: err.trace(),
        }
    }
}

fn short_type_name<T>() -> &'static str {
    let name = std::any::type_name::<T>();
    name.rsplit("::").next().unwrap_or(name)
}

/// An in-process function bound by name for execution by reference
#[derive(Clone)]
pub struct Callable {
    name: String,
    inputs: Vec<InputSpec>,
    blocking: bool,
    handler: RegisteredHandler,
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("blocking", &self.blocking)
            .finish_non_exhaustive()
    }
}

impl Callable {
    /// The registered name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ordered formal parameter specs captured at registration time
    #[inline]
    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    /// Whether the callable runs on the worker-thread pool
    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Binds the frame and invokes the callable.
    ///
    /// A panic escaping the callable is caught here and rendered as a
    /// [`CallError`] — the invocation still counts as having run.
    pub async fn invoke(&self, frame: Frame) -> Result<Value, CallError> {
        match AssertUnwindSafe(self.handler.call(frame)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err(CallError::panic(payload)),
        }
    }
}

/// A table of registered callables.
///
/// # Example
/// ```
/// use serde::Deserialize;
/// use serde_json::json;
/// use stoker::{Args, Callables};
///
/// #[derive(Deserialize)]
/// struct AddParams {
///     a: i64,
///     b: i64,
/// }
///
/// let callables = Callables::new();
/// callables.register("add", |params: Args<AddParams>| async move {
///     json!({ "result": params.a + params.b })
/// }).unwrap();
///
/// assert!(callables.contains("add"));
/// ```
#[derive(Default)]
pub struct Callables {
    items: DashMap<String, Callable>,
}

impl Callables {
    /// Creates an empty [`Callables`] table
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers an async callable under a unique name.
    ///
    /// Fails with `conflict` when the name is already bound.
    pub fn register<F, R, Args>(&self, name: &str, handler: F) -> Result<(), Error>
    where
        F: TaskHandler<Args, Output = R>,
        R: IntoOutcome + Send + 'static,
        Args: FromFrame + Send + Sync + 'static,
    {
        self.insert(Callable {
            name: name.into(),
            inputs: F::inputs(),
            blocking: false,
            handler: CallableFunc::new(handler),
        })
    }

    /// Registers a blocking callable under a unique name.
    ///
    /// The handler is dispatched to the worker-thread pool on every
    /// invocation. Fails with `conflict` when the name is already bound.
    pub fn register_blocking<F, R, Args>(&self, name: &str, handler: F) -> Result<(), Error>
    where
        F: BlockingHandler<Args, Output = R>,
        R: IntoOutcome + Send + 'static,
        Args: FromFrame + Send + Sync + 'static,
    {
        self.insert(Callable {
            name: name.into(),
            inputs: F::inputs(),
            blocking: true,
            handler: BlockingFunc::new(handler),
        })
    }

    fn insert(&self, callable: Callable) -> Result<(), Error> {
        match self.items.entry(callable.name.clone()) {
            Entry::Occupied(_) => Err(Error::new(
                ErrorKind::Conflict,
                format!("callable already registered: {}", callable.name))),
            Entry::Vacant(slot) => {
                tracing::debug!(callable = %callable.name, "callable registered");
                slot.insert(callable);
                Ok(())
            }
        }
    }

    /// Returns a registered callable by name,
    /// failing with `not-found` when absent
    pub fn get(&self, name: &str) -> Result<Callable, Error> {
        self.items
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::new(
                ErrorKind::NotFound,
                format!("callable not found: {name}")))
    }

    /// Returns whether a name is bound
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    /// Returns the sorted list of registered names
    pub fn names(&self) -> Vec<String> {
        let mut names = self.items
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Removes every registration. Intended for tests.
    pub fn clear(&self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;
    use serde::Deserialize;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use super::*;
    use crate::binder::{Args, Capability, Injections, InputSource};
    use crate::storage::Db;

    #[derive(Deserialize)]
    struct SumParams {
        a: i64,
        b: i64,
    }

    #[derive(Debug)]
    struct ValueError(String);

    impl fmt::Display for ValueError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.0.fmt(f)
        }
    }

    impl std::error::Error for ValueError {}

    fn frame(payload: Value) -> Frame {
        Frame::new(Some(payload), Injections::new(), CancellationToken::new())
    }

    #[tokio::test]
    async fn it_registers_and_invokes_callable() {
        let callables = Callables::new();
        callables
            .register("sum", |params: Args<SumParams>| async move {
                json!({ "result": params.a + params.b })
            })
            .unwrap();

        let result = callables
            .get("sum")
            .unwrap()
            .invoke(frame(json!({"a": 5, "b": 2})))
            .await
            .unwrap();

        assert_eq!(result, json!({"result": 7}));
    }

    #[test]
    fn it_fails_with_conflict_on_duplicate_name() {
        let callables = Callables::new();
        callables.register("noop", || async {}).unwrap();

        let result = callables.register("noop", || async {});
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);
    }

    #[test]
    fn it_fails_with_not_found_for_unregistered_name() {
        let callables = Callables::new();

        let result = callables.get("ghost");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn it_lists_names_sorted() {
        let callables = Callables::new();
        callables.register("bravo", || async {}).unwrap();
        callables.register("alpha", || async {}).unwrap();

        assert_eq!(callables.names(), vec!["alpha", "bravo"]);
    }

    #[test]
    fn it_clears_registrations() {
        let callables = Callables::new();
        callables.register("noop", || async {}).unwrap();

        callables.clear();

        assert!(!callables.contains("noop"));
        assert!(callables.names().is_empty());
    }

    #[tokio::test]
    async fn it_renders_raised_error_with_type_name() {
        let callables = Callables::new();
        callables
            .register("boom", || async {
                Err::<Value, _>(ValueError("nope".into()))
            })
            .unwrap();

        let err = callables
            .get("boom")
            .unwrap()
            .invoke(frame(json!({})))
            .await
            .unwrap_err();

        assert_eq!(err.r#type, "ValueError");
        assert_eq!(err.message, "nope");
        assert!(!err.traceback.is_empty());
    }

    #[tokio::test]
    async fn it_catches_panicking_callable() {
        let callables = Callables::new();
        callables
            .register::<_, (), _>("kaboom", || async {
                panic!("don't");
            })
            .unwrap();

        let err = callables
            .get("kaboom")
            .unwrap()
            .invoke(frame(json!({})))
            .await
            .unwrap_err();

        assert_eq!(err.r#type, "panic");
        assert_eq!(err.message, "don't");
    }

    #[tokio::test]
    async fn it_fails_binding_with_validation_error() {
        let callables = Callables::new();
        callables
            .register("sum", |params: Args<SumParams>| async move {
                json!(params.a + params.b)
            })
            .unwrap();

        let err = callables
            .get("sum")
            .unwrap()
            .invoke(frame(json!({"a": 1})))
            .await
            .unwrap_err();

        assert_eq!(err.r#type, "validation-failed");
        assert!(err.message.contains("`b`"));
    }

    #[tokio::test]
    async fn it_runs_blocking_callable_on_worker_thread() {
        let callables = Callables::new();
        callables
            .register_blocking("hash", |params: Args<SumParams>| {
                json!(params.a * 1000 + params.b)
            })
            .unwrap();

        let callable = callables.get("hash").unwrap();
        assert!(callable.is_blocking());

        let result = callable
            .invoke(frame(json!({"a": 4, "b": 2})))
            .await
            .unwrap();
        assert_eq!(result, json!(4002));
    }

    #[tokio::test]
    async fn it_catches_panicking_blocking_callable() {
        let callables = Callables::new();
        callables
            .register_blocking("kaboom", || -> Value { panic!("ouch") })
            .unwrap();

        let err = callables
            .get("kaboom")
            .unwrap()
            .invoke(frame(json!({})))
            .await
            .unwrap_err();

        assert_eq!(err.r#type, "panic");
        assert_eq!(err.message, "ouch");
    }

    #[test]
    fn it_captures_input_specs_at_registration() {
        let callables = Callables::new();
        callables
            .register("mixed", |_params: Args<SumParams>, _db: Db| async move {
                Value::Null
            })
            .unwrap();

        let inputs = callables.get("mixed").unwrap().inputs().to_vec();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].source(), InputSource::Payload);
        assert_eq!(inputs[1].source(), InputSource::Capability(Capability::Db));
    }

    #[test]
    fn it_builds_call_error_with_non_empty_traceback() {
        let err = CallError::new("not-found", "callable not found: ghost");

        assert_eq!(err.r#type, "not-found");
        assert_eq!(err.traceback, "not-found: callable not found: ghost");
    }

    #[test]
    fn it_serializes_call_error_type_field() {
        let err = CallError::new("panic", "ouch");
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["type"], "panic");
        assert_eq!(json["message"], "ouch");
    }
}
