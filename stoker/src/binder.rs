//! Parameter binding for registered callables
//!
//! A [`Frame`] is built per invocation from the caller-supplied JSON
//! parameters and the framework capability table. Every formal parameter of
//! a callable implements [`FromFrame`]: payload parameters deserialize out
//! of the JSON object, capability parameters are injected purely by type.

use std::ops::{Deref, DerefMut};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use crate::artifact::Artifacts;
use crate::error::{Error, ErrorKind};
use crate::scheduler::Scheduler;
use crate::storage::Db;
use crate::task::Tasks;

/// The framework-injection table handed to the binder.
///
/// Capabilities left unset surface as `conflict` when a callable asks for
/// them, unless the parameter is optional-wrapped.
#[derive(Default, Clone)]
pub struct Injections {
    pub(crate) db: Option<Db>,
    pub(crate) artifacts: Option<Artifacts>,
    pub(crate) scheduler: Option<Scheduler>,
}

impl Injections {
    /// Creates an empty [`Injections`] table
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// Provides the database lifecycle handle
    pub fn with_db(mut self, db: Db) -> Self {
        self.db = Some(db);
        self
    }

    /// Provides the artifact store handle
    pub fn with_artifacts(mut self, artifacts: Artifacts) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Provides the scheduler handle
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

/// Everything a single invocation binds its parameters from
pub struct Frame {
    payload: Value,
    caps: Injections,
    token: CancellationToken,
}

impl Frame {
    /// Creates a new [`Frame`].
    ///
    /// An absent payload binds like an empty JSON object.
    pub fn new(
        payload: Option<Value>,
        caps: Injections,
        token: CancellationToken
    ) -> Self {
        Self {
            payload: payload.unwrap_or_else(|| Value::Object(Default::default())),
            caps,
            token,
        }
    }

    /// Returns the caller-supplied parameters object
    #[inline]
    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

/// Where a formal parameter binds from
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputSource {
    /// The caller-supplied JSON parameters.
    Payload,

    /// The framework capability table.
    Capability(Capability),
}

/// An injectable capability, identified by its extractor type
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Capability {
    /// The database lifecycle handle.
    Db,

    /// A per-invocation database session.
    Session,

    /// The artifact store handle.
    Artifacts,

    /// The scheduler handle.
    Scheduler,

    /// The job's cancellation token.
    Cancellation,
}

/// Introspection record for one formal parameter of a callable
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct InputSpec {
    source: InputSource,
    optional: bool,
}

impl InputSpec {
    /// A required parameter bound from the caller payload
    #[inline]
    pub fn payload() -> Self {
        Self { source: InputSource::Payload, optional: false }
    }

    /// A required parameter injected from the capability table
    #[inline]
    pub fn capability(capability: Capability) -> Self {
        Self { source: InputSource::Capability(capability), optional: false }
    }

    /// Where the parameter binds from
    #[inline]
    pub fn source(&self) -> InputSource {
        self.source
    }

    /// Whether the parameter is optional-wrapped
    #[inline]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    fn into_optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Represents an extractor trait from an invocation frame
pub trait FromFrame: Sized {
    /// Binds the parameter out of the frame
    fn from_frame(frame: &Frame) -> Result<Self, Error>;

    /// Describes the parameter for registry introspection
    fn spec() -> InputSpec {
        InputSpec::payload()
    }
}

/// The caller-parameters object of a callable, deserialized into `T`.
///
/// Field names of `T` are the formal parameter names; serde defaults and
/// `Option` fields express defaults and optionality. A missing required
/// field fails the binding with `validation-failed` naming the field.
///
/// # Example
/// ```
/// use serde::Deserialize;
/// use stoker::Args;
///
/// #[derive(Deserialize)]
/// struct AddParams {
///     a: i64,
///     b: i64,
/// }
///
/// async fn add(params: Args<AddParams>) -> serde_json::Value {
///     serde_json::json!({ "result": params.a + params.b })
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Args<T>(pub T);

impl<T> Args<T> {
    /// Unwraps the inner `T`
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Args<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for Args<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T: DeserializeOwned> FromFrame for Args<T> {
    fn from_frame(frame: &Frame) -> Result<Self, Error> {
        serde_json::from_value(frame.payload.clone())
            .map(Args)
            .map_err(|err| Error::new(
                ErrorKind::Validation,
                format!("invalid parameters: {err}")))
    }
}

impl FromFrame for Value {
    #[inline]
    fn from_frame(frame: &Frame) -> Result<Self, Error> {
        Ok(frame.payload.clone())
    }
}

impl FromFrame for Db {
    fn from_frame(frame: &Frame) -> Result<Self, Error> {
        frame.caps.db
            .clone()
            .ok_or_else(|| Error::new(
                ErrorKind::Conflict,
                "database is not available"))
    }

    fn spec() -> InputSpec {
        InputSpec::capability(Capability::Db)
    }
}

impl FromFrame for Artifacts {
    fn from_frame(frame: &Frame) -> Result<Self, Error> {
        frame.caps.artifacts
            .clone()
            .ok_or_else(|| Error::new(
                ErrorKind::Conflict,
                "artifact store is not available"))
    }

    fn spec() -> InputSpec {
        InputSpec::capability(Capability::Artifacts)
    }
}

impl FromFrame for Scheduler {
    fn from_frame(frame: &Frame) -> Result<Self, Error> {
        frame.caps.scheduler
            .clone()
            .ok_or_else(|| Error::new(
                ErrorKind::Conflict,
                "scheduler is not available"))
    }

    fn spec() -> InputSpec {
        InputSpec::capability(Capability::Scheduler)
    }
}

impl FromFrame for CancellationToken {
    #[inline]
    fn from_frame(frame: &Frame) -> Result<Self, Error> {
        Ok(frame.token.clone())
    }

    fn spec() -> InputSpec {
        InputSpec::capability(Capability::Cancellation)
    }
}

impl FromFrame for Session {
    fn from_frame(frame: &Frame) -> Result<Self, Error> {
        Ok(Db::from_frame(frame)?.session())
    }

    fn spec() -> InputSpec {
        InputSpec::capability(Capability::Session)
    }
}

impl<T: FromFrame> FromFrame for Option<T> {
    #[inline]
    fn from_frame(frame: &Frame) -> Result<Self, Error> {
        Ok(T::from_frame(frame).ok())
    }

    fn spec() -> InputSpec {
        T::spec().into_optional()
    }
}

impl FromFrame for () {
    #[inline]
    fn from_frame(_: &Frame) -> Result<Self, Error> {
        Ok(())
    }
}

macro_rules! impl_from_frame {
    ($($T: ident),*) => {
        impl<$($T: FromFrame),+> FromFrame for ($($T,)+) {
            #[inline]
            fn from_frame(frame: &Frame) -> Result<Self, Error> {
                let args = ($(
                    $T::from_frame(frame)?,
                )*);
                Ok(args)
            }
        }
    };
}

impl_from_frame! { T1 }
impl_from_frame! { T1, T2 }
impl_from_frame! { T1, T2, T3 }
impl_from_frame! { T1, T2, T3, T4 }
impl_from_frame! { T1, T2, T3, T4, T5 }

/// A database session scoped to a single invocation.
///
/// Checked out by the binder, released by `Drop` on every exit path. The
/// store views it exposes each run their own short-lived transactional
/// scope; the executor's artifact write never goes through a callable's
/// session.
pub struct Session {
    artifacts: Artifacts,
    tasks: Tasks,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(artifacts: Artifacts, tasks: Tasks) -> Self {
        Self { artifacts, tasks }
    }

    /// Returns the artifact store scoped to this session
    #[inline]
    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    /// Returns the task template store scoped to this session
    #[inline]
    pub fn tasks(&self) -> &Tasks {
        &self.tasks
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::trace!("database session released");
    }
}
