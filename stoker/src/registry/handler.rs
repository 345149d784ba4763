//! Handler utilities for registered callables

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use futures_util::future::BoxFuture;
use serde_json::Value;
use crate::binder::{Frame, FromFrame, InputSpec};
use crate::registry::CallError;

/// A type-erased registered handler
pub(crate) type RegisteredHandler = Arc<
    dyn Handler
    + Send
    + Sync
>;

/// Represents a Frame -> outcome handler
pub(crate) trait Handler {
    fn call(&self, frame: Frame) -> BoxFuture<'_, Result<Value, CallError>>;
}

/// Represents a generic async callable handler
pub trait TaskHandler<Args>: Clone + Send + Sync + 'static {
    /// Output type
    type Output;
    /// Output future
    type Future: Future<Output = Self::Output> + Send;

    /// Calls the handler with bound arguments
    fn call(&self, args: Args) -> Self::Future;

    /// Describes the handler's formal parameters
    fn inputs() -> Vec<InputSpec> {
        Vec::new()
    }
}

/// Represents a generic blocking callable handler.
///
/// Dispatched to the worker-thread pool so that it never blocks the
/// scheduler's cooperative loop.
pub trait BlockingHandler<Args>: Clone + Send + Sync + 'static {
    /// Output type
    type Output;

    /// Calls the handler with bound arguments
    fn call(&self, args: Args) -> Self::Output;

    /// Describes the handler's formal parameters
    fn inputs() -> Vec<InputSpec> {
        Vec::new()
    }
}

/// Converts a handler's return value into the invocation outcome
pub trait IntoOutcome {
    /// Converts self into a success payload or a [`CallError`]
    fn into_outcome(self) -> Result<Value, CallError>;
}

impl IntoOutcome for Value {
    #[inline]
    fn into_outcome(self) -> Result<Value, CallError> {
        Ok(self)
    }
}

impl IntoOutcome for () {
    #[inline]
    fn into_outcome(self) -> Result<Value, CallError> {
        Ok(Value::Null)
    }
}

impl IntoOutcome for String {
    #[inline]
    fn into_outcome(self) -> Result<Value, CallError> {
        Ok(Value::String(self))
    }
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoOutcome,
    E: std::error::Error + 'static,
{
    #[inline]
    fn into_outcome(self) -> Result<Value, CallError> {
        match self {
            Ok(value) => value.into_outcome(),
            Err(err) => Err(CallError::from_std(&err)),
        }
    }
}

pub(crate) struct CallableFunc<F, R, Args>
where
    F: TaskHandler<Args, Output = R>,
    R: IntoOutcome,
    Args: FromFrame,
{
    func: F,
    _marker: PhantomData<Args>,
}

impl<F, R, Args> CallableFunc<F, R, Args>
where
    F: TaskHandler<Args, Output = R>,
    R: IntoOutcome,
    Args: FromFrame,
{
    /// Creates a new [`CallableFunc`] wrapped into [`Arc`]
    pub(crate) fn new(func: F) -> Arc<Self> {
        let func = Self { func, _marker: PhantomData };
        Arc::new(func)
    }
}

impl<F, R, Args> Handler for CallableFunc<F, R, Args>
where
    F: TaskHandler<Args, Output = R>,
    R: IntoOutcome,
    Args: FromFrame + Send + Sync,
{
    #[inline]
    fn call(&self, frame: Frame) -> BoxFuture<'_, Result<Value, CallError>> {
        Box::pin(async move {
            let args = Args::from_frame(&frame).map_err(CallError::from)?;
            self.func
                .call(args)
                .await
                .into_outcome()
        })
    }
}

pub(crate) struct BlockingFunc<F, R, Args>
where
    F: BlockingHandler<Args, Output = R>,
    R: IntoOutcome,
    Args: FromFrame,
{
    func: F,
    _marker: PhantomData<Args>,
}

impl<F, R, Args> BlockingFunc<F, R, Args>
where
    F: BlockingHandler<Args, Output = R>,
    R: IntoOutcome,
    Args: FromFrame,
{
    /// Creates a new [`BlockingFunc`] wrapped into [`Arc`]
    pub(crate) fn new(func: F) -> Arc<Self> {
        let func = Self { func, _marker: PhantomData };
        Arc::new(func)
    }
}

impl<F, R, Args> Handler for BlockingFunc<F, R, Args>
where
    F: BlockingHandler<Args, Output = R>,
    R: IntoOutcome + Send + 'static,
    Args: FromFrame + Send + Sync + 'static,
{
    fn call(&self, frame: Frame) -> BoxFuture<'_, Result<Value, CallError>> {
        Box::pin(async move {
            let args = Args::from_frame(&frame).map_err(CallError::from)?;
            let func = self.func.clone();
            match tokio::task::spawn_blocking(move || func.call(args).into_outcome()).await {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => Err(CallError::panic(err.into_panic())),
                Err(err) => Err(CallError::from_std(&err)),
            }
        })
    }
}

macro_rules! impl_task_handler ({ $($param:ident)* } => {
    impl<Func, Fut, $($param: FromFrame,)*> TaskHandler<($($param,)*)> for Func
    where
        Func: Fn($($param),*) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future + Send + 'static,
    {
        type Output = Fut::Output;
        type Future = Fut;

        #[inline]
        #[allow(non_snake_case)]
        fn call(&self, ($($param,)*): ($($param,)*)) -> Self::Future {
            (self)($($param,)*)
        }

        #[inline]
        fn inputs() -> Vec<InputSpec> {
            vec![$($param::spec(),)*]
        }
    }
    impl<Func, R: 'static, $($param: FromFrame,)*> BlockingHandler<($($param,)*)> for Func
    where
        Func: Fn($($param),*) -> R + Clone + Send + Sync + 'static,
    {
        type Output = R;

        #[inline]
        #[allow(non_snake_case)]
        fn call(&self, ($($param,)*): ($($param,)*)) -> Self::Output {
            (self)($($param,)*)
        }

        #[inline]
        fn inputs() -> Vec<InputSpec> {
            vec![$($param::spec(),)*]
        }
    }
});

impl_task_handler! {}
impl_task_handler! { T1 }
impl_task_handler! { T1 T2 }
impl_task_handler! { T1 T2 T3 }
impl_task_handler! { T1 T2 T3 T4 }
impl_task_handler! { T1 T2 T3 T4 T5 }
