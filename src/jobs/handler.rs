//! # Handler and hook abstractions.
//!
//! This module defines the traits applications implement to process jobs —
//! [`Handler`] for the work itself, [`Hook`] for before/after observation, and
//! [`ErrorHook`] for failure observation — plus the function-backed adapters
//! ([`HandlerFn`], [`HookFn`], [`ErrorHookFn`]) that wrap plain closures.
//!
//! Every hook receives the full [`JobContext`] (name, argument, job id) and
//! ignores what it does not need; there is no arity inspection.
//!
//! ## Failure semantics
//! - A failing before/after hook feeds the same failure path as a failing
//!   handler: the job is buried and error hooks run.
//! - Error hooks are observers and cannot fail; a panic inside one is a bug
//!   and propagates to the runner.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::JobError;
use crate::queue::JobId;

/// Dispatch context handed to hooks.
///
/// Cheap to clone; the argument value is shared, not copied.
#[derive(Clone, Debug)]
pub struct JobContext {
    /// Job name the dispatch resolved to.
    pub name: Arc<str>,
    /// Decoded handler argument.
    pub args: Arc<Value>,
    /// Broker handle of the job being worked.
    pub job: JobId,
}

/// # A unit of application work.
///
/// Registered under a job name via
/// [`HandlerRegistry::register`](crate::HandlerRegistry::register); invoked
/// once per reserved job with the decoded argument.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use jobvisor::{Handler, JobError};
/// use serde_json::Value;
///
/// struct SendWelcomeMail;
///
/// #[async_trait]
/// impl Handler for SendWelcomeMail {
///     async fn call(&self, args: &Value) -> Result<(), JobError> {
///         let user = args["user_id"].as_u64().ok_or_else(|| JobError::failed("missing user_id"))?;
///         // deliver mail for `user`...
///         # let _ = user;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Processes one job.
    async fn call(&self, args: &Value) -> Result<(), JobError>;
}

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn Handler>;

/// Before/after hook around job dispatch.
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    /// Runs around one dispatch; a returned error aborts the dispatch.
    async fn call(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// Shared handle to a hook.
pub type HookRef = Arc<dyn Hook>;

/// Failure observer invoked after a dispatch has failed and the job is buried.
#[async_trait]
pub trait ErrorHook: Send + Sync + 'static {
    /// Observes one failure.
    async fn call(&self, error: &JobError, ctx: &JobContext);
}

/// Shared handle to an error hook.
pub type ErrorHookRef = Arc<dyn ErrorHook>;

/// Function-backed handler.
///
/// Wraps a closure that creates a new future per dispatch; state shared
/// between dispatches goes through an explicit `Arc` inside the closure.
///
/// ## Example
/// ```
/// use jobvisor::{HandlerFn, HandlerRef, JobError};
/// use serde_json::Value;
///
/// let h: HandlerRef = HandlerFn::arc(|args: Value| async move {
///     println!("working on {args}");
///     Ok::<_, JobError>(())
/// });
/// ```
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    /// Creates a new function-backed handler.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the handler and returns it as a shared [`HandlerRef`].
    pub fn arc<Fut>(f: F) -> Arc<Self>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn call(&self, args: &Value) -> Result<(), JobError> {
        (self.f)(args.clone()).await
    }
}

/// Function-backed before/after hook.
pub struct HookFn<F> {
    f: F,
}

impl<F> HookFn<F> {
    /// Creates a new function-backed hook.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the hook and returns it as a shared [`HookRef`].
    pub fn arc<Fut>(f: F) -> Arc<Self>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Hook for HookFn<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn call(&self, ctx: &JobContext) -> Result<(), JobError> {
        (self.f)(ctx.clone()).await
    }
}

/// Function-backed error hook.
pub struct ErrorHookFn<F> {
    f: F,
}

impl<F> ErrorHookFn<F> {
    /// Creates a new function-backed error hook.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the error hook and returns it as a shared [`ErrorHookRef`].
    pub fn arc<Fut>(f: F) -> Arc<Self>
    where
        F: Fn(JobError, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> ErrorHook for ErrorHookFn<F>
where
    F: Fn(JobError, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn call(&self, error: &JobError, ctx: &JobContext) {
        (self.f)(error.clone(), ctx.clone()).await
    }
}
