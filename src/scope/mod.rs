// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Scopes: owners of resolved values and their lifecycles.
//!
//! A scope memoizes executor resolutions, owns the cleanups their factories
//! register, records reactive edges, and propagates updates across the
//! reactive subgraph with deterministic ordering. Disposal is terminal:
//! every cached executor is released in reverse insertion order and further
//! operations fail with a disposed error.
//!
//! [`Pod`]s are child scopes used as the sandbox for flow executions; they
//! inherit parent values by copy-on-read and never write upward.
//!
//! ```rust
//! use the_arbor::executor::{derive, provide};
//! use the_arbor::scope::Scope;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let counter = provide(|_| async { Ok(0u32) });
//! let doubled = derive(counter.reactive(), |n, _| async move { Ok(*n * 2) });
//!
//! let scope = Scope::new();
//! assert_eq!(*scope.resolve(&doubled).await?, 0);
//!
//! // Updating the producer re-produces its reactive dependents.
//! scope.update(&counter, 21).await?;
//! assert_eq!(*scope.accessor(&doubled).get()?, 42);
//! # Ok(())
//! # }
//! ```

mod accessor;
mod builder;
mod cache;
mod controller;
mod pod;
mod resolver;

#[cfg(test)]
mod integration_tests;

pub use accessor::{Accessor, AccessorCore, AccessorHandle, ResolveState};
pub use builder::ScopeBuilder;
pub use controller::Controller;
pub use pod::{Pod, PodOptions};

pub(crate) use cache::CacheEntry;
pub(crate) use controller::{Cleanup, ResolutionPath};

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};

use crate::errors::ResolveError;
use crate::executor::{Executor, ExecutorCore, ExecutorRef, Preset};
use crate::extension::Extension;
use crate::observability::messages::scope::ScopeDisposed as ScopeDisposedMsg;
use crate::observability::messages::StructuredLog;
use crate::tag::{AnyValue, Store, TagSource, Tagged};

/// Poison-tolerant lock: scope state stays usable even if a callback
/// panicked while a guard was held.
pub(crate) fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What changed about an executor, for scope-wide change callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Resolve,
    Update,
    Release,
}

pub(crate) type UpdateCallback = Arc<dyn Fn(AccessorHandle) + Send + Sync>;
pub(crate) type ChangeCallback =
    Arc<dyn Fn(ChangeEvent, &ExecutorRef, Option<&AnyValue>) + Send + Sync>;
pub(crate) type ReleaseCallback = Arc<dyn Fn(&ExecutorRef) + Send + Sync>;
pub(crate) type ErrorCallback =
    Arc<dyn Fn(&Arc<ResolveError>, Option<&ExecutorRef>) + Send + Sync>;

/// A member of a producer's reactive dependent set: an executor to
/// re-produce, or a subscription callback to invoke.
#[derive(Clone)]
pub(crate) enum ReactiveDependent {
    Executor(Arc<ExecutorCore>),
    Callback { id: u64, callback: UpdateCallback },
}

/// The replacement value of an update: a value, or a function of the
/// current value.
pub(crate) enum NextValue {
    Value(AnyValue),
    Map(Box<dyn FnOnce(AnyValue) -> Result<AnyValue, ResolveError> + Send>),
}

/// Removes a registered callback or extension when invoked. Dropping the
/// subscription without calling [`Subscription::unsubscribe`] leaves the
/// registration in place.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Subscription")
    }
}

pub(crate) struct ScopeState {
    pub(crate) cache: HashMap<u64, CacheEntry>,
    pub(crate) cache_order: Vec<u64>,
    pub(crate) executors: HashMap<u64, Arc<ExecutorCore>>,
    pub(crate) cleanups: HashMap<u64, Vec<Cleanup>>,
    pub(crate) reactive_dependents: HashMap<u64, Vec<ReactiveDependent>>,
    pub(crate) update_locks: HashMap<u64, Arc<tokio::sync::Mutex<()>>>,
    pub(crate) accessors: HashMap<u64, AccessorHandle>,
    pub(crate) update_callbacks: HashMap<u64, Vec<(u64, UpdateCallback)>>,
    pub(crate) change_callbacks: Vec<(u64, ChangeCallback)>,
    pub(crate) release_callbacks: Vec<(u64, ReleaseCallback)>,
    pub(crate) error_callbacks: Vec<(u64, ErrorCallback)>,
    pub(crate) extensions: Vec<Arc<dyn Extension>>,
    pub(crate) reversed_extensions: Vec<Arc<dyn Extension>>,
    pub(crate) metas: Vec<Tagged>,
    pub(crate) child_pods: Vec<Weak<ScopeCore>>,
    callback_counter: u64,
    pub(crate) disposed: bool,
}

impl ScopeState {
    pub(crate) fn new(extensions: Vec<Arc<dyn Extension>>, metas: Vec<Tagged>) -> Self {
        let reversed_extensions = extensions.iter().rev().cloned().collect();
        Self {
            cache: HashMap::new(),
            cache_order: Vec::new(),
            executors: HashMap::new(),
            cleanups: HashMap::new(),
            reactive_dependents: HashMap::new(),
            update_locks: HashMap::new(),
            accessors: HashMap::new(),
            update_callbacks: HashMap::new(),
            change_callbacks: Vec::new(),
            release_callbacks: Vec::new(),
            error_callbacks: Vec::new(),
            extensions,
            reversed_extensions,
            metas,
            child_pods: Vec::new(),
            callback_counter: 0,
            disposed: false,
        }
    }

    pub(crate) fn next_callback_id(&mut self) -> u64 {
        self.callback_counter += 1;
        self.callback_counter
    }

    pub(crate) fn rebuild_reversed(&mut self) {
        self.reversed_extensions = self.extensions.iter().rev().cloned().collect();
    }

    /// Record a resolved value for an executor this scope had no entry for.
    pub(crate) fn insert_resolved(&mut self, executor: &Arc<ExecutorCore>, value: AnyValue) {
        self.cache.insert(executor.id, CacheEntry::Resolved(value));
        if !self.cache_order.contains(&executor.id) {
            self.cache_order.push(executor.id);
        }
        self.executors.insert(executor.id, executor.clone());
    }

    /// Record a reactive edge producer -> consumer, once per pair.
    pub(crate) fn add_reactive_edge(
        &mut self,
        producer: &Arc<ExecutorCore>,
        consumer: &Arc<ExecutorCore>,
    ) {
        let dependents = self.reactive_dependents.entry(producer.id).or_default();
        let already = dependents.iter().any(|dependent| match dependent {
            ReactiveDependent::Executor(existing) => existing.id == consumer.id,
            ReactiveDependent::Callback { .. } => false,
        });
        if !already {
            dependents.push(ReactiveDependent::Executor(consumer.clone()));
        }
    }
}

/// Shared heart of a scope or pod.
pub(crate) struct ScopeCore {
    pub(crate) state: StdMutex<ScopeState>,
    /// Context store handed to extension wraps for resolve/update.
    pub(crate) ext_store: Arc<Store>,
    /// Ancestor caches, nearest first. Empty for root scopes. Precomputed at
    /// construction so hierarchical lookup is one hop per level.
    pub(crate) parent_chain: Vec<Arc<ScopeCore>>,
    pub(crate) is_pod: bool,
}

impl ScopeCore {
    pub(crate) fn root(extensions: Vec<Arc<dyn Extension>>, metas: Vec<Tagged>) -> Arc<Self> {
        Arc::new(Self {
            state: StdMutex::new(ScopeState::new(extensions, metas)),
            ext_store: Arc::new(Store::new()),
            parent_chain: Vec::new(),
            is_pod: false,
        })
    }

    pub(crate) fn accessor_handle(self: &Arc<Self>, executor: &Arc<ExecutorCore>) -> AccessorHandle {
        let mut state = lock(&self.state);
        state
            .accessors
            .entry(executor.id)
            .or_insert_with(|| {
                Arc::new(AccessorCore {
                    scope: Arc::downgrade(self),
                    executor: executor.clone(),
                })
            })
            .clone()
    }

    pub(crate) fn insert_preset(&self, preset: &Preset) {
        let mut state = lock(&self.state);
        state.insert_resolved(&preset.core, preset.value.clone());
    }

    /// Dispose this scope: child pods first, then extension hooks, then every
    /// cached executor in reverse insertion order.
    pub(crate) fn dispose_core(self: &Arc<Self>) -> futures::future::BoxFuture<'static, Result<(), ResolveError>> {
        use futures::FutureExt;
        let this = self.clone();
        async move {
            {
                let state = lock(&this.state);
                if state.disposed {
                    return Err(ResolveError::scope_disposed("dispose"));
                }
            }

            let children = {
                let state = lock(&this.state);
                state.child_pods.clone()
            };
            for child in children {
                if let Some(child) = child.upgrade() {
                    let _ = child.dispose_core().await;
                }
            }

            let extensions = {
                let state = lock(&this.state);
                state.extensions.clone()
            };
            if this.is_pod {
                let pod = Pod::from_core(this.clone());
                for extension in &extensions {
                    let _ = extension.dispose_pod(&pod).await;
                }
            } else {
                let scope = Scope { core: this.clone() };
                for extension in &extensions {
                    let _ = extension.dispose(&scope).await;
                }
            }

            let targets: Vec<Arc<ExecutorCore>> = {
                let state = lock(&this.state);
                state
                    .cache_order
                    .iter()
                    .rev()
                    .filter_map(|id| state.executors.get(id).cloned())
                    .collect()
            };
            let released = targets.len();
            for executor in targets {
                let _ = this.release_entry(&executor, true).await;
            }

            {
                let mut state = lock(&this.state);
                state.cache.clear();
                state.cache_order.clear();
                state.executors.clear();
                state.cleanups.clear();
                state.reactive_dependents.clear();
                state.update_locks.clear();
                state.accessors.clear();
                state.update_callbacks.clear();
                state.change_callbacks.clear();
                state.release_callbacks.clear();
                state.error_callbacks.clear();
                state.extensions.clear();
                state.reversed_extensions.clear();
                state.child_pods.clear();
                state.disposed = true;
            }
            ScopeDisposedMsg {
                released,
                pod: this.is_pod,
            }
            .log();
            Ok(())
        }
        .boxed()
    }
}

/// Handle to a scope. Cloning shares the same underlying state.
#[derive(Clone)]
pub struct Scope {
    pub(crate) core: Arc<ScopeCore>,
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.core.state);
        f.debug_struct("Scope")
            .field("cached", &state.cache.len())
            .field("pod", &self.core.is_pod)
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    /// A fresh root scope with no extensions or metas.
    pub fn new() -> Self {
        Self {
            core: ScopeCore::root(Vec::new(), Vec::new()),
        }
    }

    pub fn builder() -> ScopeBuilder {
        ScopeBuilder::new()
    }

    /// Resolve an executor, producing it on first use. Concurrent calls for
    /// the same executor share one factory run.
    pub async fn resolve<T: Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
    ) -> Result<Arc<T>, ResolveError> {
        let value = self
            .core
            .resolve_entry(&executor.core, &ResolutionPath::default())
            .await
            .map_err(|err| (*err).clone())?;
        value.downcast::<T>().map_err(|_| {
            ResolveError::internal(format!(
                "resolved value for '{}' has an unexpected type",
                executor.name()
            ))
        })
    }

    /// The stable accessor for an executor within this scope.
    pub fn accessor<T: Send + Sync + 'static>(&self, executor: &Executor<T>) -> Accessor<T> {
        Accessor::from_handle(self.core.accessor_handle(&executor.core))
    }

    /// Replace a resolved executor's value and propagate to its reactive
    /// dependents.
    pub async fn update<T: Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
        value: T,
    ) -> Result<(), ResolveError> {
        self.core
            .update_entry(&executor.core, NextValue::Value(Arc::new(value)))
            .await
    }

    /// Replace a resolved executor's value by applying `f` to the current
    /// one.
    pub async fn update_with<T, F>(&self, executor: &Executor<T>, f: F) -> Result<(), ResolveError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> T + Send + 'static,
    {
        let name = executor.name();
        self.core
            .update_entry(
                &executor.core,
                NextValue::Map(Box::new(move |current| {
                    let current = current.downcast::<T>().map_err(|_| {
                        ResolveError::internal(format!(
                            "current value for '{}' has an unexpected type",
                            name
                        ))
                    })?;
                    Ok(Arc::new(f(current)) as AnyValue)
                })),
            )
            .await
    }

    /// Release an executor, cascading through its reactive dependents.
    /// Releasing an uncached executor is a no-op.
    pub async fn release<T: Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
    ) -> Result<(), ResolveError> {
        {
            let state = lock(&self.core.state);
            if state.disposed {
                return Err(ResolveError::scope_disposed("release"));
            }
        }
        self.core.release_entry(&executor.core, false).await
    }

    /// Dispose the scope. Terminal: afterwards every operation fails.
    pub async fn dispose(&self) -> Result<(), ResolveError> {
        self.core.dispose_core().await
    }

    /// Register an extension and run its `init` hook. The returned
    /// subscription removes it again.
    pub async fn use_extension(
        &self,
        extension: Arc<dyn Extension>,
    ) -> Result<Subscription, ResolveError> {
        {
            let mut state = lock(&self.core.state);
            if state.disposed {
                return Err(ResolveError::scope_disposed("use_extension"));
            }
            state.extensions.push(extension.clone());
            state.rebuild_reversed();
        }
        if let Err(cause) = extension.init(self).await {
            let mut state = lock(&self.core.state);
            state
                .extensions
                .retain(|existing| !Arc::ptr_eq(existing, &extension));
            state.rebuild_reversed();
            drop(state);
            let boxed: Box<dyn std::error::Error + Send + Sync> = cause.into();
            return Err(ResolveError::internal(format!(
                "extension '{}' failed to initialize",
                extension.name()
            ))
            .with_cause(Arc::from(boxed)));
        }
        let weak = Arc::downgrade(&self.core);
        Ok(Subscription::new(move || {
            if let Some(core) = weak.upgrade() {
                let mut state = lock(&core.state);
                state
                    .extensions
                    .retain(|existing| !Arc::ptr_eq(existing, &extension));
                state.rebuild_reversed();
            }
        }))
    }

    /// Observe every resolve, update, and release in this scope.
    pub fn on_change(
        &self,
        callback: impl Fn(ChangeEvent, &ExecutorRef, Option<&AnyValue>) + Send + Sync + 'static,
    ) -> Subscription {
        let mut state = lock(&self.core.state);
        let id = state.next_callback_id();
        state.change_callbacks.push((id, Arc::new(callback)));
        drop(state);
        self.remove_from(move |state| {
            state.change_callbacks.retain(|(cb_id, _)| *cb_id != id);
        })
    }

    /// Observe updates of one executor; the callback receives its accessor.
    pub fn on_update<T: Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
        callback: impl Fn(Accessor<T>) + Send + Sync + 'static,
    ) -> Subscription {
        let mut state = lock(&self.core.state);
        let id = state.next_callback_id();
        let executor_id = executor.core.id;
        state
            .update_callbacks
            .entry(executor_id)
            .or_default()
            .push((
                id,
                Arc::new(move |handle: AccessorHandle| callback(Accessor::from_handle(handle))),
            ));
        drop(state);
        self.remove_from(move |state| {
            if let Some(callbacks) = state.update_callbacks.get_mut(&executor_id) {
                callbacks.retain(|(cb_id, _)| *cb_id != id);
            }
        })
    }

    /// Observe executor releases.
    pub fn on_release(
        &self,
        callback: impl Fn(&ExecutorRef) + Send + Sync + 'static,
    ) -> Subscription {
        let mut state = lock(&self.core.state);
        let id = state.next_callback_id();
        state.release_callbacks.push((id, Arc::new(callback)));
        drop(state);
        self.remove_from(move |state| {
            state.release_callbacks.retain(|(cb_id, _)| *cb_id != id);
        })
    }

    /// Observe resolution, cleanup, and propagation failures.
    pub fn on_error(
        &self,
        callback: impl Fn(&Arc<ResolveError>, Option<&ExecutorRef>) + Send + Sync + 'static,
    ) -> Subscription {
        let mut state = lock(&self.core.state);
        let id = state.next_callback_id();
        state.error_callbacks.push((id, Arc::new(callback)));
        drop(state);
        self.remove_from(move |state| {
            state.error_callbacks.retain(|(cb_id, _)| *cb_id != id);
        })
    }

    fn remove_from(&self, remove: impl FnOnce(&mut ScopeState) + Send + 'static) -> Subscription {
        let weak = Arc::downgrade(&self.core);
        Subscription::new(move || {
            if let Some(core) = weak.upgrade() {
                let mut state = lock(&core.state);
                remove(&mut state);
            }
        })
    }

    /// Scope-level metas.
    pub fn metas(&self) -> Vec<Tagged> {
        let state = lock(&self.core.state);
        state.metas.clone()
    }

    /// Append a scope-level meta entry.
    pub fn add_meta(&self, entry: Tagged) {
        let mut state = lock(&self.core.state);
        state.metas.push(entry);
    }

    pub fn is_disposed(&self) -> bool {
        let state = lock(&self.core.state);
        state.disposed
    }

    /// Whether this handle points at a pod.
    pub fn is_pod(&self) -> bool {
        self.core.is_pod
    }

    /// Identity of the underlying scope state.
    pub fn same_scope(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl TagSource for Scope {
    fn tag_entries(&self) -> Vec<Tagged> {
        self.metas()
    }
}
