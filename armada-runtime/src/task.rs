//! Named task definitions executed by workers.

use crate::args::TaskArgs;
use crate::context::ExecutionContext;
use crate::handle::ResultHandle;
use armada_core::ResultId;
use armada_core::codec::{Codec, sealed};
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a context-aware task body produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<O> {
    /// The task's own value.
    Value(O),
    /// The result of this invocation is whatever the given result resolves to.
    Delegated(ResultId),
}

impl<O> Outcome<O> {
    /// Finish this invocation with whatever `handle` resolves to.
    pub fn delegate_to<C: Codec>(handle: &ResultHandle<C>) -> Self {
        Outcome::Delegated(handle.result_id().clone())
    }
}

/// Encoded outcome of a task run, as reported to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskReturn {
    Value(Bytes),
    Delegated(ResultId),
}

/// A task that can be run by a worker.
pub trait CoreTask<C>: Send + Sync {
    fn run(&self, context: ExecutionContext<C>, args: TaskArgs<C>)
    -> BoxFuture<'static, anyhow::Result<TaskReturn>>;
}

struct FnTaskWrapper<F, O, Fut> {
    func: Arc<F>,
    _phantom: PhantomData<fn() -> (O, Fut)>,
}

impl<C, F, O, Fut, E> CoreTask<C> for FnTaskWrapper<F, O, Fut>
where
    C: Codec + sealed::EncodeValue<O>,
    F: Fn(TaskArgs<C>) -> Fut + Send + Sync + 'static,
    O: Send + 'static,
    Fut: Future<Output = Result<O, E>> + Send + 'static,
    E: Into<anyhow::Error>,
{
    fn run(
        &self,
        context: ExecutionContext<C>,
        args: TaskArgs<C>,
    ) -> BoxFuture<'static, anyhow::Result<TaskReturn>> {
        let func = Arc::clone(&self.func);
        Box::pin(async move {
            let output = func(args).await.map_err(Into::into)?;
            Ok(TaskReturn::Value(context.codec().encode(&output)?))
        })
    }
}

struct ContextFnTaskWrapper<F, O, Fut> {
    func: Arc<F>,
    _phantom: PhantomData<fn() -> (O, Fut)>,
}

impl<C, F, O, Fut, E> CoreTask<C> for ContextFnTaskWrapper<F, O, Fut>
where
    C: Codec + sealed::EncodeValue<O>,
    F: Fn(ExecutionContext<C>, TaskArgs<C>) -> Fut + Send + Sync + 'static,
    O: Send + 'static,
    Fut: Future<Output = Result<Outcome<O>, E>> + Send + 'static,
    E: Into<anyhow::Error>,
{
    fn run(
        &self,
        context: ExecutionContext<C>,
        args: TaskArgs<C>,
    ) -> BoxFuture<'static, anyhow::Result<TaskReturn>> {
        let func = Arc::clone(&self.func);
        let codec = Arc::clone(context.codec());
        Box::pin(async move {
            match func(context, args).await.map_err(Into::into)? {
                Outcome::Value(output) => Ok(TaskReturn::Value(codec.encode(&output)?)),
                Outcome::Delegated(child) => Ok(TaskReturn::Delegated(child)),
            }
        })
    }
}

/// A named unit of remote work.
///
/// The name is what travels to the backend; workers look the body up in their
/// [`TaskRegistry`](crate::registry::TaskRegistry). Clients and workers must
/// therefore agree on names.
///
/// ```rust,ignore
/// let add = Task::new("add", |args: TaskArgs<JsonCodec>| async move {
///     Ok::<_, anyhow::Error>(args.get::<i64>(0)? + args.get::<i64>(1)?)
/// });
/// ```
pub struct Task<C> {
    name: Arc<str>,
    requires_context: bool,
    body: Arc<dyn CoreTask<C>>,
}

impl<C: Codec> Task<C> {
    /// A task whose body only sees its arguments.
    pub fn new<F, O, Fut, E>(name: impl Into<String>, func: F) -> Self
    where
        C: sealed::EncodeValue<O>,
        F: Fn(TaskArgs<C>) -> Fut + Send + Sync + 'static,
        O: Send + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        Self::from_core(
            name,
            false,
            FnTaskWrapper {
                func: Arc::new(func),
                _phantom: PhantomData,
            },
        )
    }

    /// A task whose body also receives its [`ExecutionContext`] and may delegate.
    pub fn with_context<F, O, Fut, E>(name: impl Into<String>, func: F) -> Self
    where
        C: sealed::EncodeValue<O>,
        F: Fn(ExecutionContext<C>, TaskArgs<C>) -> Fut + Send + Sync + 'static,
        O: Send + 'static,
        Fut: Future<Output = Result<Outcome<O>, E>> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        Self::from_core(
            name,
            true,
            ContextFnTaskWrapper {
                func: Arc::new(func),
                _phantom: PhantomData,
            },
        )
    }

    /// Wrap a hand-written [`CoreTask`].
    pub fn from_core(
        name: impl Into<String>,
        requires_context: bool,
        body: impl CoreTask<C> + 'static,
    ) -> Self {
        Self {
            name: Arc::from(name.into()),
            requires_context,
            body: Arc::new(body),
        }
    }

    pub(crate) fn run(
        &self,
        context: ExecutionContext<C>,
        args: TaskArgs<C>,
    ) -> BoxFuture<'static, anyhow::Result<TaskReturn>> {
        self.body.run(context, args)
    }
}

impl<C> Task<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requires_context(&self) -> bool {
        self.requires_context
    }
}

impl<C> Clone for Task<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            requires_context: self.requires_context,
            body: Arc::clone(&self.body),
        }
    }
}

impl<C> fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("requires_context", &self.requires_context)
            .finish()
    }
}
