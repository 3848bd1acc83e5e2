// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The controller handed to every factory invocation.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::errors::ResolveError;
use crate::executor::{Executor, ExecutorCore, ExecutorRef};

use super::{lock, Scope};

/// Names along an in-flight resolution, outermost first. Threaded through
/// dependency resolution and through controller-initiated resolves, so cycles
/// that pass through a factory are still detected.
#[derive(Clone, Default, Debug)]
pub(crate) struct ResolutionPath {
    entries: Vec<(u64, String)>,
}

impl ResolutionPath {
    pub(crate) fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|(entry_id, _)| *entry_id == id)
    }

    pub(crate) fn push(&self, id: u64, name: String) -> Self {
        let mut entries = self.entries.clone();
        entries.push((id, name));
        Self { entries }
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(_, name)| name.clone()).collect()
    }

    /// The path with one more name appended, for cycle reports.
    pub(crate) fn names_with(&self, name: String) -> Vec<String> {
        let mut names = self.names();
        names.push(name);
        names
    }
}

/// A disposal hook registered by a factory. Hooks run in LIFO order on the
/// next update or release of the owning executor.
pub(crate) enum Cleanup {
    Sync(Box<dyn FnOnce() + Send>),
    Async(Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>),
}

impl Cleanup {
    pub(crate) async fn run(self) -> anyhow::Result<()> {
        match self {
            Cleanup::Sync(f) => {
                f();
                Ok(())
            }
            Cleanup::Async(f) => f().await,
        }
    }
}

/// Passed to every factory. Registers cleanups for the current production,
/// resolves further executors with cycle detection, and can release its own
/// executor.
#[derive(Clone)]
pub struct Controller {
    pub(crate) scope: Scope,
    pub(crate) executor: Arc<ExecutorCore>,
    pub(crate) path: ResolutionPath,
}

impl Controller {
    /// Register a synchronous disposal hook.
    pub fn cleanup(&self, hook: impl FnOnce() + Send + 'static) {
        self.push_cleanup(Cleanup::Sync(Box::new(hook)));
    }

    /// Register an asynchronous disposal hook. A returned error is reported
    /// through the scope's error callbacks and does not stop later hooks.
    pub fn cleanup_async<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push_cleanup(Cleanup::Async(Box::new(move || hook().boxed())));
    }

    fn push_cleanup(&self, cleanup: Cleanup) {
        let mut state = lock(&self.scope.core.state);
        if state.disposed {
            return;
        }
        state
            .cleanups
            .entry(self.executor.id)
            .or_default()
            .push(cleanup);
    }

    /// Resolve another executor, continuing this resolution's path so cycles
    /// through factories are detected.
    pub async fn resolve<T: Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
    ) -> Result<Arc<T>, ResolveError> {
        let value = self
            .scope
            .core
            .resolve_entry(&executor.core, &self.path)
            .await
            .map_err(|err| (*err).clone())?;
        value.downcast::<T>().map_err(|_| {
            ResolveError::internal(format!(
                "resolved value for '{}' has an unexpected type",
                executor.name()
            ))
        })
    }

    /// Soft-release this executor.
    pub async fn release(&self) -> Result<(), ResolveError> {
        self.scope.core.release_entry(&self.executor, true).await
    }

    /// The owning scope (a pod when the factory runs inside one). Resolves
    /// through this handle start a fresh resolution path.
    pub fn scope(&self) -> Scope {
        self.scope.clone()
    }

    pub fn executor(&self) -> ExecutorRef {
        ExecutorRef {
            core: self.executor.clone(),
        }
    }
}
