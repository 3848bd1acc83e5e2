// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Resolution, update propagation, and release machinery.
//!
//! The resolver walks an executor's dependency spec, materializes each edge
//! according to its variant, and invokes the factory through the extension
//! pipeline. State locks are never held across an await: every async step
//! snapshots what it needs, works, then re-locks to publish.
//!
//! # Memoization
//!
//! A cache miss installs a `Pending` entry carrying a shared future before
//! any work happens, so concurrent resolutions of the same executor await
//! the same factory run. The future finalizes its own entry: on completion
//! it swaps `Pending` for `Resolved` or `Rejected` while registering any
//! reactive edges the dependency walk recorded.
//!
//! # Propagation
//!
//! `update` serializes per executor, runs the producer's cleanups in LIFO
//! order, swaps the entry, then walks reactive dependents depth-first in
//! insertion order: each dependent is fully re-produced before its own
//! dependents are visited. A dependent that fails re-production is marked
//! rejected and reported; its siblings still run.

use std::sync::{Arc, Mutex as StdMutex};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;

use crate::errors::{ErrorCode, ResolveError};
use crate::executor::{
    DepValue, DependencyRef, DependencySpec, ExecutorCore, ExecutorRef, FactoryError, ResolvedDeps,
    Variant,
};
use crate::extension::{compose, OperationDescriptor, WrapResult};
use crate::observability::messages::scope::{ExecutorResolved, ResolutionFailed, UpdatePropagated};
use crate::observability::messages::StructuredLog;
use crate::tag::AnyValue;

use super::cache::{CacheEntry, SharedResolution};
use super::controller::{Controller, ResolutionPath};
use super::{lock, ChangeEvent, NextValue, ReactiveDependent, Scope, ScopeCore};

/// Reactive producers recorded while materializing one consumer's spec.
pub(crate) type EdgeSink = Arc<StdMutex<Vec<Arc<ExecutorCore>>>>;

impl ScopeCore {
    /// Resolve `executor` against this scope, memoizing through the cache
    /// and deduplicating concurrent calls through the shared pending future.
    pub(crate) fn resolve_entry(
        self: &Arc<Self>,
        executor: &Arc<ExecutorCore>,
        path: &ResolutionPath,
    ) -> BoxFuture<'static, Result<AnyValue, Arc<ResolveError>>> {
        let this = self.clone();
        let executor = executor.clone();
        let path = path.clone();
        async move {
            if path.contains(executor.id) {
                let chain = path.names_with(executor.display_name());
                return Err(Arc::new(ResolveError::cycle(chain)));
            }

            // Fast path against the local cache.
            let pending = {
                let state = lock(&this.state);
                if state.disposed {
                    return Err(Arc::new(ResolveError::scope_disposed("resolve")));
                }
                match state.cache.get(&executor.id) {
                    Some(CacheEntry::Resolved(value)) => return Ok(value.clone()),
                    Some(CacheEntry::Rejected(err)) => return Err(err.clone()),
                    Some(CacheEntry::Pending(shared)) => Some(shared.clone()),
                    None => None,
                }
            };
            if let Some(shared) = pending {
                return shared.await;
            }

            // Hierarchical lookup: copy a resolved value out of the nearest
            // ancestor that has one. Cleanup ownership stays with the owner.
            if let Some(value) = this.lookup_parents(executor.id) {
                let pending = {
                    let mut state = lock(&this.state);
                    if state.disposed {
                        return Err(Arc::new(ResolveError::scope_disposed("resolve")));
                    }
                    match state.cache.get(&executor.id) {
                        // A concurrent resolution beat us to the slot.
                        Some(CacheEntry::Resolved(existing)) => return Ok(existing.clone()),
                        Some(CacheEntry::Rejected(err)) => return Err(err.clone()),
                        Some(CacheEntry::Pending(shared)) => Some(shared.clone()),
                        None => {
                            state.insert_resolved(&executor, value.clone());
                            None
                        }
                    }
                };
                return match pending {
                    Some(shared) => shared.await,
                    None => Ok(value),
                };
            }

            // Local production. Install the pending entry before any work.
            let shared = {
                let mut state = lock(&this.state);
                if state.disposed {
                    return Err(Arc::new(ResolveError::scope_disposed("resolve")));
                }
                match state.cache.get(&executor.id) {
                    Some(CacheEntry::Resolved(value)) => return Ok(value.clone()),
                    Some(CacheEntry::Rejected(err)) => return Err(err.clone()),
                    Some(CacheEntry::Pending(shared)) => shared.clone(),
                    None => {
                        let shared: SharedResolution = this
                            .clone()
                            .produce_and_finalize(executor.clone(), path.clone())
                            .boxed()
                            .shared();
                        state
                            .cache
                            .insert(executor.id, CacheEntry::Pending(shared.clone()));
                        state.cache_order.push(executor.id);
                        state.executors.insert(executor.id, executor.clone());
                        shared
                    }
                }
            };
            shared.await
        }
        .boxed()
    }

    fn lookup_parents(&self, executor_id: u64) -> Option<AnyValue> {
        for ancestor in &self.parent_chain {
            let state = lock(&ancestor.state);
            if let Some(CacheEntry::Resolved(value)) = state.cache.get(&executor_id) {
                return Some(value.clone());
            }
        }
        None
    }

    /// Drive one production and publish its outcome into the cache.
    async fn produce_and_finalize(
        self: Arc<Self>,
        executor: Arc<ExecutorCore>,
        path: ResolutionPath,
    ) -> Result<AnyValue, Arc<ResolveError>> {
        let path = path.push(executor.id, executor.display_name());
        match self.produce(&executor, &path).await {
            Ok((value, edges)) => {
                {
                    let mut state = lock(&self.state);
                    if let Some(entry) = state.cache.get_mut(&executor.id) {
                        if entry.is_pending() {
                            *entry = CacheEntry::Resolved(value.clone());
                        }
                    }
                    for producer in &edges {
                        state.add_reactive_edge(producer, &executor);
                    }
                }
                ExecutorResolved {
                    executor: &executor.display_name(),
                    reactive_edges: edges.len(),
                }
                .log();
                self.notify_change(ChangeEvent::Resolve, &executor, Some(&value));
                Ok(value)
            }
            Err(err) => {
                {
                    let mut state = lock(&self.state);
                    if let Some(entry) = state.cache.get_mut(&executor.id) {
                        if entry.is_pending() {
                            *entry = CacheEntry::Rejected(err.clone());
                        }
                    }
                }
                ResolutionFailed {
                    executor: &executor.display_name(),
                    code: err.code.as_str(),
                }
                .log();
                self.notify_error(&err, Some(&executor));
                Err(err)
            }
        }
    }

    /// Materialize dependencies and run the factory, wrapped by the
    /// extension pipeline. Returns the produced value and the reactive
    /// producers to record edges for.
    pub(crate) async fn produce(
        self: &Arc<Self>,
        executor: &Arc<ExecutorCore>,
        path: &ResolutionPath,
    ) -> Result<(AnyValue, Vec<Arc<ExecutorCore>>), Arc<ResolveError>> {
        let reversed = {
            let state = lock(&self.state);
            state.reversed_extensions.clone()
        };
        let edges: EdgeSink = Arc::new(StdMutex::new(Vec::new()));

        let this = self.clone();
        let exec = executor.clone();
        let walk_path = path.clone();
        let edge_sink = edges.clone();
        let core: Box<dyn FnOnce() -> BoxFuture<'static, WrapResult> + Send> =
            Box::new(move || {
                async move {
                    let deps = this
                        .materialize_spec(
                            &exec.dependencies,
                            exec.display_name(),
                            &walk_path,
                            Some(&edge_sink),
                        )
                        .await
                        .map_err(|err| anyhow::Error::new((*err).clone()))?;
                    let controller = Controller {
                        scope: Scope { core: this.clone() },
                        executor: exec.clone(),
                        path: walk_path.clone(),
                    };
                    match (exec.factory)(deps, controller).await {
                        Ok(value) => Ok(value),
                        Err(FactoryError::User(cause)) => {
                            // A resolution error flowing back out of a factory
                            // (controller resolves) keeps its identity.
                            match cause.downcast::<ResolveError>() {
                                Ok(resolve_err)
                                    if resolve_err.code == ErrorCode::DependencyCycle =>
                                {
                                    Err(anyhow::Error::new(resolve_err))
                                }
                                Ok(resolve_err) => {
                                    Err(anyhow::Error::new(ResolveError::factory_failed(
                                        &exec.display_name(),
                                        walk_path.names(),
                                        anyhow::Error::new(resolve_err),
                                    )))
                                }
                                Err(cause) => {
                                    Err(anyhow::Error::new(ResolveError::factory_failed(
                                        &exec.display_name(),
                                        walk_path.names(),
                                        cause,
                                    )))
                                }
                            }
                        }
                        Err(FactoryError::Shape(message)) => Err(anyhow::Error::new(
                            ResolveError::internal(format!(
                                "dependency shape mismatch for '{}': {}",
                                exec.display_name(),
                                message
                            )),
                        )),
                    }
                }
                .boxed()
            });

        let descriptor = OperationDescriptor::Resolve {
            executor: ExecutorRef {
                core: executor.clone(),
            },
        };
        let result = compose(reversed, self.ext_store.clone(), descriptor, core).await;
        match result {
            Ok(value) => {
                let recorded = {
                    let mut sink = edges.lock().unwrap_or_else(|e| e.into_inner());
                    std::mem::take(&mut *sink)
                };
                Ok((value, recorded))
            }
            Err(err) => Err(Arc::new(self.into_resolve_error(executor, err, "resolution"))),
        }
    }

    /// Convert a pipeline failure back into a typed error: resolution errors
    /// pass through, anything else came from an extension.
    pub(crate) fn into_resolve_error(
        &self,
        executor: &Arc<ExecutorCore>,
        err: anyhow::Error,
        operation: &str,
    ) -> ResolveError {
        match err.downcast::<ResolveError>() {
            Ok(resolve_err) => resolve_err,
            Err(other) => {
                let boxed: Box<dyn std::error::Error + Send + Sync> = other.into();
                ResolveError::internal(format!(
                    "extension aborted {} of '{}'",
                    operation,
                    executor.display_name()
                ))
                .with_cause(Arc::from(boxed))
            }
        }
    }

    /// Materialize a dependency spec into its matching shape. `edges` is
    /// `Some` when reactive variants should record producer edges; flows
    /// pass `None` and receive plain values for reactive refs.
    pub(crate) fn materialize_spec(
        self: &Arc<Self>,
        spec: &DependencySpec,
        consumer: String,
        path: &ResolutionPath,
        edges: Option<&EdgeSink>,
    ) -> BoxFuture<'static, Result<ResolvedDeps, Arc<ResolveError>>> {
        let this = self.clone();
        let spec = spec.clone();
        let path = path.clone();
        let edges = edges.cloned();
        async move {
            match spec {
                DependencySpec::None => Ok(ResolvedDeps::None),
                DependencySpec::Single(dep) => {
                    let value = this
                        .materialize_ref(&dep, &consumer, &path, edges.as_ref())
                        .await?;
                    Ok(ResolvedDeps::Single(value))
                }
                DependencySpec::List(refs) => {
                    let futures: Vec<_> = refs
                        .iter()
                        .map(|dep| this.materialize_ref(dep, &consumer, &path, edges.as_ref()))
                        .collect();
                    let mut values = Vec::with_capacity(refs.len());
                    for result in join_all(futures).await {
                        values.push(result?);
                    }
                    Ok(ResolvedDeps::List(values))
                }
                DependencySpec::Record(entries) => {
                    let futures: Vec<_> = entries
                        .iter()
                        .map(|(_, dep)| this.materialize_ref(dep, &consumer, &path, edges.as_ref()))
                        .collect();
                    let resolved = join_all(futures).await;
                    let mut values = Vec::with_capacity(entries.len());
                    for ((key, _), result) in entries.into_iter().zip(resolved) {
                        values.push((key, result?));
                    }
                    Ok(ResolvedDeps::Record(values))
                }
            }
        }
        .boxed()
    }

    async fn materialize_ref(
        self: &Arc<Self>,
        dep: &DependencyRef,
        consumer: &str,
        path: &ResolutionPath,
        edges: Option<&EdgeSink>,
    ) -> Result<DepValue, Arc<ResolveError>> {
        let target = dep.target.clone();
        match dep.variant() {
            Variant::Lazy => Ok(DepValue::Accessor(self.accessor_handle(&target))),
            Variant::Base => {
                let value = self.resolve_dependency(&target, consumer, path).await?;
                Ok(DepValue::Value(value))
            }
            Variant::Static => {
                self.resolve_dependency(&target, consumer, path).await?;
                Ok(DepValue::Accessor(self.accessor_handle(&target)))
            }
            Variant::Reactive => {
                let value = self.resolve_dependency(&target, consumer, path).await?;
                if let Some(sink) = edges {
                    let mut sink = sink.lock().unwrap_or_else(|e| e.into_inner());
                    if !sink.iter().any(|p| p.id == target.id) {
                        sink.push(target.clone());
                    }
                }
                Ok(DepValue::Value(value))
            }
        }
    }

    async fn resolve_dependency(
        self: &Arc<Self>,
        target: &Arc<ExecutorCore>,
        consumer: &str,
        path: &ResolutionPath,
    ) -> Result<AnyValue, Arc<ResolveError>> {
        self.resolve_entry(target, path).await.map_err(|err| {
            if err.code == ErrorCode::DependencyCycle {
                err
            } else {
                Arc::new(ResolveError::dependency_failed(consumer, path.names(), err))
            }
        })
    }

    /// Replace an executor's value and propagate through its reactive
    /// dependents. Serialized per executor; awaits a pending resolution
    /// before applying.
    pub(crate) async fn update_entry(
        self: &Arc<Self>,
        executor: &Arc<ExecutorCore>,
        next: NextValue,
    ) -> Result<(), ResolveError> {
        let update_lock = {
            let mut state = lock(&self.state);
            if state.disposed {
                return Err(ResolveError::scope_disposed("update"));
            }
            state
                .update_locks
                .entry(executor.id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _serialized = update_lock.lock().await;

        // An update issued while the executor is still pending waits for the
        // in-flight resolution, then applies.
        let pending = {
            let state = lock(&self.state);
            match state.cache.get(&executor.id) {
                Some(CacheEntry::Pending(shared)) => Some(shared.clone()),
                _ => None,
            }
        };
        if let Some(shared) = pending {
            let _ = shared.await;
        }

        let reversed = {
            let state = lock(&self.state);
            state.reversed_extensions.clone()
        };
        let this = self.clone();
        let exec = executor.clone();
        let core: Box<dyn FnOnce() -> BoxFuture<'static, WrapResult> + Send> =
            Box::new(move || {
                async move {
                    this.apply_update(&exec, next)
                        .await
                        .map_err(anyhow::Error::new)
                }
                .boxed()
            });
        let descriptor = OperationDescriptor::Update {
            executor: ExecutorRef {
                core: executor.clone(),
            },
        };
        let result = compose(reversed, self.ext_store.clone(), descriptor, core).await;
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                let resolved = self.into_resolve_error(executor, err, "update");
                self.notify_error(&Arc::new(resolved.clone()), Some(executor));
                return Err(resolved);
            }
        };

        let dependents = self.reproduce_dependents(executor).await;
        UpdatePropagated {
            executor: &executor.display_name(),
            dependents,
        }
        .log();

        let handle = self.accessor_handle(executor);
        let update_callbacks = {
            let state = lock(&self.state);
            state
                .update_callbacks
                .get(&executor.id)
                .cloned()
                .unwrap_or_default()
        };
        for (_, callback) in update_callbacks {
            callback(handle.clone());
        }
        self.notify_change(ChangeEvent::Update, executor, Some(&value));
        Ok(())
    }

    /// Cleanups, compute, swap. The core of an update, run inside the
    /// extension pipeline.
    async fn apply_update(
        self: &Arc<Self>,
        executor: &Arc<ExecutorCore>,
        next: NextValue,
    ) -> Result<AnyValue, ResolveError> {
        self.run_cleanups(executor).await;

        let current = {
            let state = lock(&self.state);
            match state.cache.get(&executor.id) {
                Some(CacheEntry::Resolved(value)) => value.clone(),
                _ => {
                    return Err(ResolveError::not_resolved(
                        &executor.display_name(),
                        "update",
                    ))
                }
            }
        };
        let value = match next {
            NextValue::Value(value) => value,
            NextValue::Map(f) => f(current)?,
        };
        let mut state = lock(&self.state);
        if state.disposed {
            return Err(ResolveError::scope_disposed("update"));
        }
        state
            .cache
            .insert(executor.id, CacheEntry::Resolved(value.clone()));
        Ok(value)
    }

    /// Depth-first re-production of the reactive dependents of `producer`,
    /// in edge insertion order. Returns how many dependents were visited.
    pub(crate) fn reproduce_dependents(
        self: &Arc<Self>,
        producer: &Arc<ExecutorCore>,
    ) -> BoxFuture<'static, usize> {
        let this = self.clone();
        let producer = producer.clone();
        async move {
            let dependents = {
                let state = lock(&this.state);
                state
                    .reactive_dependents
                    .get(&producer.id)
                    .cloned()
                    .unwrap_or_default()
            };
            let mut visited = 0usize;
            for dependent in dependents {
                match dependent {
                    ReactiveDependent::Executor(consumer) => {
                        let live = {
                            let state = lock(&this.state);
                            state.cache.contains_key(&consumer.id)
                        };
                        if !live {
                            continue;
                        }
                        visited += 1;
                        this.run_cleanups(&consumer).await;
                        match this.produce(&consumer, &ResolutionPath::default()).await {
                            Ok((value, edges)) => {
                                {
                                    let mut state = lock(&this.state);
                                    state
                                        .cache
                                        .insert(consumer.id, CacheEntry::Resolved(value));
                                    for edge_producer in &edges {
                                        state.add_reactive_edge(edge_producer, &consumer);
                                    }
                                }
                                visited += this.reproduce_dependents(&consumer).await;
                            }
                            Err(err) => {
                                {
                                    let mut state = lock(&this.state);
                                    state
                                        .cache
                                        .insert(consumer.id, CacheEntry::Rejected(err.clone()));
                                }
                                this.notify_error(&err, Some(&consumer));
                            }
                        }
                    }
                    ReactiveDependent::Callback { callback, .. } => {
                        visited += 1;
                        callback(this.accessor_handle(&producer));
                    }
                }
            }
            visited
        }
        .boxed()
    }

    /// Run and clear an executor's cleanups in LIFO order. Failures are
    /// reported through error callbacks and do not stop later hooks.
    pub(crate) async fn run_cleanups(self: &Arc<Self>, executor: &Arc<ExecutorCore>) {
        let cleanups = {
            let mut state = lock(&self.state);
            state.cleanups.remove(&executor.id).unwrap_or_default()
        };
        for cleanup in cleanups.into_iter().rev() {
            if let Err(cause) = cleanup.run().await {
                let err = Arc::new(ResolveError::cleanup_failed(
                    &executor.display_name(),
                    cause,
                ));
                crate::observability::messages::scope::CleanupFailed {
                    executor: &executor.display_name(),
                    error: err.as_ref(),
                }
                .log();
                self.notify_error(&err, Some(executor));
            }
        }
    }

    /// Release an executor: run cleanups, cascade through reactive
    /// dependents, and drop all bookkeeping. A soft release of an uncached
    /// executor is a no-op.
    pub(crate) fn release_entry(
        self: &Arc<Self>,
        executor: &Arc<ExecutorCore>,
        soft: bool,
    ) -> BoxFuture<'static, Result<(), ResolveError>> {
        let this = self.clone();
        let executor = executor.clone();
        async move {
            let entry = {
                let state = lock(&this.state);
                state.cache.get(&executor.id).cloned()
            };
            match entry {
                None => return Ok(()),
                Some(CacheEntry::Pending(shared)) => {
                    // Let the in-flight production settle so its cleanups are
                    // registered before they run.
                    let _ = shared.await;
                }
                _ => {}
            }
            if soft && !lock(&this.state).cache.contains_key(&executor.id) {
                return Ok(());
            }

            this.run_cleanups(&executor).await;

            let dependents = {
                let state = lock(&this.state);
                state
                    .reactive_dependents
                    .get(&executor.id)
                    .cloned()
                    .unwrap_or_default()
            };
            for dependent in dependents {
                if let ReactiveDependent::Executor(consumer) = dependent {
                    this.release_entry(&consumer, true).await?;
                }
            }

            {
                let mut state = lock(&this.state);
                state.cache.remove(&executor.id);
                state.cache_order.retain(|id| *id != executor.id);
                state.cleanups.remove(&executor.id);
                state.reactive_dependents.remove(&executor.id);
                for dependents in state.reactive_dependents.values_mut() {
                    dependents.retain(|dependent| match dependent {
                        ReactiveDependent::Executor(consumer) => consumer.id != executor.id,
                        ReactiveDependent::Callback { .. } => true,
                    });
                }
                state.update_locks.remove(&executor.id);
                state.executors.remove(&executor.id);
            }
            this.notify_release(&executor);
            this.notify_change(ChangeEvent::Release, &executor, None);
            Ok(())
        }
        .boxed()
    }

    pub(crate) fn notify_change(
        &self,
        event: ChangeEvent,
        executor: &Arc<ExecutorCore>,
        value: Option<&AnyValue>,
    ) {
        let callbacks = {
            let state = lock(&self.state);
            state.change_callbacks.clone()
        };
        let executor_ref = ExecutorRef {
            core: executor.clone(),
        };
        for (_, callback) in callbacks {
            callback(event, &executor_ref, value);
        }
    }

    pub(crate) fn notify_release(&self, executor: &Arc<ExecutorCore>) {
        let callbacks = {
            let state = lock(&self.state);
            state.release_callbacks.clone()
        };
        let executor_ref = ExecutorRef {
            core: executor.clone(),
        };
        for (_, callback) in callbacks {
            callback(&executor_ref);
        }
    }

    pub(crate) fn notify_error(
        self: &Arc<Self>,
        error: &Arc<ResolveError>,
        executor: Option<&Arc<ExecutorCore>>,
    ) {
        let (callbacks, extensions) = {
            let state = lock(&self.state);
            (state.error_callbacks.clone(), state.extensions.clone())
        };
        let executor_ref = executor.map(|core| ExecutorRef { core: core.clone() });
        for (_, callback) in callbacks {
            callback(error, executor_ref.as_ref());
        }
        let scope = Scope { core: self.clone() };
        for extension in extensions {
            extension.on_error(error.as_ref(), &scope);
        }
    }
}
