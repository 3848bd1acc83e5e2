// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Extension pipeline.
//!
//! Extensions intercept core operations by wrapping them: the innermost
//! callable is the operation itself, and each registered extension receives
//! the remainder of the chain as [`Next`]. Registration order determines
//! nesting: the first registered extension is the outermost wrap. Scopes
//! precompute the reversed list on every registration change, so composing a
//! chain is a straight fold with no per-call sorting.
//!
//! Extensions are side-effect disciplined: anything observable must flow
//! through the result of `next` or a returned error. A wrap may call `next`
//! zero or one times; skipping it short-circuits the operation.

mod operation;

pub use operation::{OperationDescriptor, ParallelMode};

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::errors::ResolveError;
use crate::scope::{Pod, Scope};
use crate::tag::{AnyValue, Store};

/// Result of a wrapped operation, with the value type erased.
pub type WrapResult = Result<AnyValue, anyhow::Error>;

/// The remainder of a wrap chain.
pub struct Next {
    inner: Box<dyn FnOnce() -> BoxFuture<'static, WrapResult> + Send>,
}

impl Next {
    pub(crate) fn new(inner: Box<dyn FnOnce() -> BoxFuture<'static, WrapResult> + Send>) -> Self {
        Self { inner }
    }

    /// Run the rest of the chain, ending in the core operation.
    pub async fn run(self) -> WrapResult {
        (self.inner)().await
    }
}

/// A cross-cutting participant in scope and flow operations.
///
/// Every hook has a default implementation, so an extension implements only
/// what it needs. The default `wrap` is the identity passthrough.
///
/// ```rust
/// use async_trait::async_trait;
/// use the_arbor::extension::{Extension, Next, OperationDescriptor, WrapResult};
/// use the_arbor::tag::Store;
///
/// struct Timing;
///
/// #[async_trait]
/// impl Extension for Timing {
///     fn name(&self) -> &str {
///         "timing"
///     }
///
///     async fn wrap(
///         &self,
///         _context: &Store,
///         next: Next,
///         operation: &OperationDescriptor,
///     ) -> WrapResult {
///         let started = std::time::Instant::now();
///         let result = next.run().await;
///         tracing::debug!(
///             kind = operation.kind(),
///             elapsed_ms = started.elapsed().as_millis() as u64,
///             "operation finished"
///         );
///         result
///     }
/// }
/// ```
#[async_trait]
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    /// Called when the extension is registered on a scope.
    async fn init(&self, scope: &Scope) -> anyhow::Result<()> {
        let _ = scope;
        Ok(())
    }

    /// Called when the scope is disposed.
    async fn dispose(&self, scope: &Scope) -> anyhow::Result<()> {
        let _ = scope;
        Ok(())
    }

    /// Called when a pod inheriting this extension is created.
    async fn init_pod(&self, pod: &Pod) -> anyhow::Result<()> {
        let _ = pod;
        Ok(())
    }

    /// Called when a pod inheriting this extension is disposed.
    async fn dispose_pod(&self, pod: &Pod) -> anyhow::Result<()> {
        let _ = pod;
        Ok(())
    }

    /// Intercept an operation. `context` is the operation's context store:
    /// the scope's store for resolve/update, the execution's local store for
    /// flow operations.
    async fn wrap(
        &self,
        context: &Store,
        next: Next,
        operation: &OperationDescriptor,
    ) -> WrapResult {
        let _ = (context, operation);
        next.run().await
    }

    /// Observe an error reported by the scope.
    fn on_error(&self, error: &ResolveError, scope: &Scope) {
        let _ = (error, scope);
    }
}

/// Fold an operation through a reversed extension list.
///
/// `reversed` must be the registration order reversed: the fold wraps the
/// core with each element in turn, leaving the first-registered extension
/// outermost.
pub(crate) fn compose(
    reversed: Vec<Arc<dyn Extension>>,
    context: Arc<Store>,
    operation: OperationDescriptor,
    core: Box<dyn FnOnce() -> BoxFuture<'static, WrapResult> + Send>,
) -> BoxFuture<'static, WrapResult> {
    let operation = Arc::new(operation);
    let mut next = Next::new(core);
    for extension in reversed {
        let store = context.clone();
        let op = operation.clone();
        let prev = next;
        next = Next::new(Box::new(move || {
            async move { extension.wrap(&store, prev, &op).await }.boxed()
        }));
    }
    async move { next.run().await }.boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Extension for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn wrap(
            &self,
            _context: &Store,
            next: Next,
            operation: &OperationDescriptor,
        ) -> WrapResult {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:enter:{}", self.name, operation.kind()));
            let result = next.run().await;
            self.log.lock().unwrap().push(format!("{}:exit", self.name));
            result
        }
    }

    #[tokio::test]
    async fn first_registered_extension_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let extensions: Vec<Arc<dyn Extension>> = vec![
            Arc::new(Recorder {
                name: "first",
                log: log.clone(),
            }),
            Arc::new(Recorder {
                name: "second",
                log: log.clone(),
            }),
        ];
        let reversed: Vec<Arc<dyn Extension>> = extensions.iter().rev().cloned().collect();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_core = calls.clone();
        let result = compose(
            reversed,
            Arc::new(Store::new()),
            OperationDescriptor::Journal { key: "op".into() },
            Box::new(move || {
                async move {
                    calls_in_core.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(11u32) as AnyValue)
                }
                .boxed()
            }),
        )
        .await;

        assert_eq!(*result.unwrap().downcast::<u32>().unwrap(), 11);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "first:enter:journal",
                "second:enter:journal",
                "second:exit",
                "first:exit"
            ]
        );
    }

    struct ShortCircuit;

    #[async_trait]
    impl Extension for ShortCircuit {
        fn name(&self) -> &str {
            "short-circuit"
        }

        async fn wrap(
            &self,
            _context: &Store,
            _next: Next,
            _operation: &OperationDescriptor,
        ) -> WrapResult {
            Err(anyhow::anyhow!("denied"))
        }
    }

    #[tokio::test]
    async fn skipping_next_short_circuits_the_core() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_core = calls.clone();
        let result = compose(
            vec![Arc::new(ShortCircuit)],
            Arc::new(Store::new()),
            OperationDescriptor::Journal { key: "op".into() },
            Box::new(move || {
                async move {
                    calls_in_core.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(0u8) as AnyValue)
                }
                .boxed()
            }),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
