// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Flows: journaled, composable effect execution over pods.
//!
//! A flow pairs a handler with an optional definition (name and schemas) and
//! an optional dependency spec in the same shapes `derive` accepts. Executing
//! a flow creates a fresh pod under the target scope and a structured
//! context; the handler composes sub-flows (each in its own nested pod),
//! journals keyed effects through `ctx.run`, and aggregates siblings with
//! the parallel compositions. Results come back as a [`FlowHandle`], which
//! keeps the execution context reachable for inspection.
//!
//! ```rust
//! use the_arbor::flow::{execute, Flow};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let double = Flow::new(|ctx, n: u32| async move {
//!     // Journaled: replays instead of re-running on a repeated key.
//!     let doubled = ctx.run("double", move || async move { Ok(n * 2) }).await?;
//!     Ok(*doubled)
//! });
//!
//! assert_eq!(*execute(&double, 21).await?, 42);
//! # Ok(())
//! # }
//! ```

mod context;
mod definition;
mod handle;
mod journal;
pub mod meta;
mod settled;

#[cfg(test)]
mod integration_tests;

pub use context::{Ctx, ExecOptions, FlowContext};
pub use definition::FlowDefinition;
pub use handle::{FlowDetails, FlowHandle};
pub use journal::{Journal, JournalEntry, JournalRecord};
pub use settled::{FlowStats, ParallelOutcome, SettledBatch, SettledResult};

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::errors::{FlowError, ResolveError};
use crate::executor::{DependencySet, DependencySpec, MaterializeError, ResolvedDeps};
use crate::extension::{compose, OperationDescriptor, WrapResult};
use crate::observability::messages::flow::{FlowFinished, FlowStarted};
use crate::observability::messages::StructuredLog;
use crate::scope::{lock, PodOptions, Scope};
use crate::tag::{AnyValue, Tagged};

/// Handler failures, split so dependency-shape defects stay distinguishable
/// from user errors.
enum HandlerFailure {
    User(anyhow::Error),
    Shape(String),
}

type ErasedHandler<I, O> =
    Arc<dyn Fn(ResolvedDeps, Ctx, I) -> BoxFuture<'static, Result<O, HandlerFailure>> + Send + Sync>;

struct FlowInner<I, O> {
    definition: FlowDefinition<I, O>,
    dependencies: DependencySpec,
    handler: ErasedHandler<I, O>,
}

/// A first-class flow value. Cloning shares the definition and handler, so
/// flows can be stored in tags and passed around freely.
pub struct Flow<I, O> {
    inner: Arc<FlowInner<I, O>>,
}

impl<I, O> Clone for Flow<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<I, O> std::fmt::Debug for Flow<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.inner.definition.display_name())
            .finish()
    }
}

impl<I, O> Flow<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    /// An anonymous flow with no dependencies or schemas.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Ctx, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        Self::define(FlowDefinition::new()).handler(handler)
    }

    /// An anonymous flow over a dependency spec.
    pub fn with_deps<D, F, Fut>(dependencies: D, handler: F) -> Self
    where
        D: DependencySet,
        F: Fn(D::Output, Ctx, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        Self::define(FlowDefinition::new()).handler_with(dependencies, handler)
    }

    /// Start from a definition; attach the handler to finish.
    pub fn define(definition: FlowDefinition<I, O>) -> DefineBuilder<I, O> {
        DefineBuilder { definition }
    }

    pub fn definition(&self) -> &FlowDefinition<I, O> {
        &self.inner.definition
    }

    pub fn dependencies(&self) -> &DependencySpec {
        &self.inner.dependencies
    }

    pub fn name(&self) -> String {
        self.inner.definition.display_name()
    }

    /// Execute against a fresh scope. See [`execute_with`] for options.
    pub fn execute(&self, input: I) -> FlowHandle<O> {
        execute_with(self, input, ExecuteOptions::default())
    }
}

/// Second stage of flow construction.
pub struct DefineBuilder<I, O> {
    definition: FlowDefinition<I, O>,
}

impl<I, O> DefineBuilder<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    pub fn handler<F, Fut>(self, handler: F) -> Flow<I, O>
    where
        F: Fn(Ctx, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let erased: ErasedHandler<I, O> = Arc::new(move |_deps, ctx, input| {
            let fut = handler(ctx, input);
            async move { fut.await.map_err(HandlerFailure::User) }.boxed()
        });
        Flow {
            inner: Arc::new(FlowInner {
                definition: self.definition,
                dependencies: DependencySpec::None,
                handler: erased,
            }),
        }
    }

    pub fn handler_with<D, F, Fut>(self, dependencies: D, handler: F) -> Flow<I, O>
    where
        D: DependencySet,
        F: Fn(D::Output, Ctx, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let spec = dependencies.spec();
        let materialize: fn(ResolvedDeps) -> Result<D::Output, MaterializeError> = D::materialize;
        let erased: ErasedHandler<I, O> = Arc::new(move |deps, ctx, input| {
            let typed = match materialize(deps) {
                Ok(typed) => typed,
                Err(err) => {
                    return futures::future::ready(Err(HandlerFailure::Shape(err.message))).boxed()
                }
            };
            let fut = handler(typed, ctx, input);
            async move { fut.await.map_err(HandlerFailure::User) }.boxed()
        });
        Flow {
            inner: Arc::new(FlowInner {
                definition: self.definition,
                dependencies: spec,
                handler: erased,
            }),
        }
    }
}

/// Options for a root execution.
#[derive(Default)]
pub struct ExecuteOptions {
    /// Run against this scope instead of creating one.
    pub scope: Option<Scope>,
    /// Metas applied to the root pod.
    pub meta: Vec<Tagged>,
    /// Metas applied to the scope, only when the scope was newly created.
    pub scope_meta: Vec<Tagged>,
}

/// Execute a flow against a fresh scope.
pub fn execute<I, O>(flow: &Flow<I, O>, input: I) -> FlowHandle<O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    execute_with(flow, input, ExecuteOptions::default())
}

/// Execute a flow: create or adopt the scope, seed the root pod, build the
/// root context, and run the handler through the extension pipeline.
pub fn execute_with<I, O>(flow: &Flow<I, O>, input: I, options: ExecuteOptions) -> FlowHandle<O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    let flow = flow.clone();
    let fut = async move {
        let scope = match options.scope {
            Some(scope) => scope,
            None => {
                let scope = Scope::new();
                for entry in options.scope_meta {
                    scope.add_meta(entry);
                }
                scope
            }
        };
        let mut pod_options = PodOptions::new();
        for entry in options.meta {
            pod_options = pod_options.meta(entry);
        }
        let pod = match scope.pod_with(pod_options).await {
            Ok(pod) => pod,
            Err(error) => return (Err(FlowError::Resolve(error)), None),
        };
        let context = FlowContext::root(pod, flow.name());
        let descriptors = vec![OperationDescriptor::FlowRun {
            flow_name: flow.name(),
        }];
        let result = run_flow(flow, context.clone(), input, descriptors).await;
        (result, Some(context))
    };
    FlowHandle::spawn(None, fut)
}

/// Convert a pipeline failure back to a typed flow error.
pub(crate) fn to_flow_error(error: anyhow::Error) -> FlowError {
    match error.downcast::<FlowError>() {
        Ok(flow_error) => flow_error,
        Err(error) => match error.downcast::<ResolveError>() {
            Ok(resolve_error) => FlowError::Resolve(resolve_error),
            Err(other) => FlowError::Wrap {
                cause: Arc::new(other),
            },
        },
    }
}

/// Validate input, resolve dependencies against the context's pod, invoke
/// the handler through the extension pipeline, and validate output.
/// `descriptors` is the wrap nesting, outermost first.
pub(crate) async fn run_flow<I, O>(
    flow: Flow<I, O>,
    context: Arc<FlowContext>,
    input: I,
    descriptors: Vec<OperationDescriptor>,
) -> Result<Arc<O>, FlowError>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    let flow_name = flow.name();
    let depth = context.depth();
    FlowStarted {
        flow: &flow_name,
        depth,
    }
    .log();

    let input = match flow.inner.definition.validate_input(input) {
        Ok(input) => input,
        Err(error) => {
            FlowFinished {
                flow: &flow_name,
                depth,
                success: false,
            }
            .log();
            return Err(error);
        }
    };

    let reversed = {
        let state = lock(&context.pod().as_scope().core.state);
        state.reversed_extensions.clone()
    };
    let store = context.store_arc();

    let inner = flow.inner.clone();
    let run_context = context.clone();
    let run_name = flow_name.clone();
    let core: Box<dyn FnOnce() -> BoxFuture<'static, WrapResult> + Send> = Box::new(move || {
        async move {
            let pod_core = run_context.pod().as_scope().core.clone();
            let deps = pod_core
                .materialize_spec(
                    &inner.dependencies,
                    run_name.clone(),
                    &Default::default(),
                    None,
                )
                .await
                .map_err(|err| anyhow::Error::new(FlowError::Resolve((*err).clone())))?;
            let ctx = Ctx::new(run_context.clone());
            let output = (inner.handler)(deps, ctx, input).await.map_err(|failure| {
                match failure {
                    HandlerFailure::User(cause) => {
                        anyhow::Error::new(flow_failure(&run_name, cause))
                    }
                    HandlerFailure::Shape(message) => anyhow::Error::new(FlowError::handler(
                        run_name.clone(),
                        anyhow::anyhow!("dependency shape mismatch: {}", message),
                    )),
                }
            })?;
            let output = inner
                .definition
                .validate_output(output)
                .map_err(anyhow::Error::new)?;
            Ok(Arc::new(output) as AnyValue)
        }
        .boxed()
    });

    // Nest the descriptor folds, innermost last.
    let mut wrapped = core;
    for descriptor in descriptors.into_iter().rev() {
        let reversed = reversed.clone();
        let store = store.clone();
        let inner_core = wrapped;
        wrapped = Box::new(move || compose(reversed, store, descriptor, inner_core));
    }

    let result = wrapped().await;
    let outcome = match result {
        Ok(value) => value.downcast::<O>().map_err(|_| FlowError::Join {
            message: "flow produced an unexpected type".to_string(),
        }),
        Err(error) => Err(to_flow_error(error)),
    };
    FlowFinished {
        flow: &flow_name,
        depth,
        success: outcome.is_ok(),
    }
    .log();
    outcome
}

/// A handler error that is already a flow error keeps its identity; anything
/// else wraps as a handler failure.
fn flow_failure(flow_name: &str, cause: anyhow::Error) -> FlowError {
    match cause.downcast::<FlowError>() {
        Ok(flow_error) => flow_error,
        Err(cause) => match cause.downcast::<ResolveError>() {
            Ok(resolve_error) => FlowError::Resolve(resolve_error),
            Err(cause) => FlowError::handler(flow_name, cause),
        },
    }
}
