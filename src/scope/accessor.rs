// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Stable per-(scope, executor) handles.
//!
//! An accessor is the synchronous window into a cache entry plus the async
//! operations of its executor. Accessors are referentially stable: a scope
//! hands out the same underlying handle for the same executor every time, so
//! lazy and static dependency edges can be compared and stored.

use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use crate::errors::ResolveError;
use crate::executor::{Executor, ExecutorCore, ExecutorRef};
use crate::tag::AnyValue;

use super::cache::CacheEntry;
use super::controller::ResolutionPath;
use super::{lock, NextValue, ReactiveDependent, ScopeCore, Subscription};

/// The untyped shared accessor state. Opaque outside the crate; the typed
/// [`Accessor`] is the usable surface.
pub struct AccessorCore {
    pub(crate) scope: Weak<ScopeCore>,
    pub(crate) executor: Arc<ExecutorCore>,
}

/// Shared, untyped accessor reference, as carried by materialized lazy and
/// static dependency edges.
pub type AccessorHandle = Arc<AccessorCore>;

/// Current cache state of an executor, as seen through an accessor.
#[derive(Debug)]
pub enum ResolveState<T> {
    Pending,
    Resolved(Arc<T>),
    Rejected(ResolveError),
}

/// Typed accessor for an executor within one scope.
pub struct Accessor<T> {
    pub(crate) core: AccessorHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Accessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Accessor({})", self.core.executor.display_name())
    }
}

impl<T: Send + Sync + 'static> Accessor<T> {
    pub(crate) fn from_handle(core: AccessorHandle) -> Self {
        Self {
            core,
            _marker: PhantomData,
        }
    }

    fn scope_core(&self) -> Result<Arc<ScopeCore>, ResolveError> {
        self.core
            .scope
            .upgrade()
            .ok_or_else(|| ResolveError::scope_disposed("accessor"))
    }

    fn downcast(&self, value: AnyValue) -> Result<Arc<T>, ResolveError> {
        value.downcast::<T>().map_err(|_| {
            ResolveError::internal(format!(
                "resolved value for '{}' has an unexpected type",
                self.core.executor.display_name()
            ))
        })
    }

    /// Resolve the executor, producing it on first use.
    pub async fn resolve(&self) -> Result<Arc<T>, ResolveError> {
        let scope = self.scope_core()?;
        let value = scope
            .resolve_entry(&self.core.executor, &ResolutionPath::default())
            .await
            .map_err(|err| (*err).clone())?;
        self.downcast(value)
    }

    /// Current value. Fails when the executor is unresolved, still pending,
    /// or rejected; a rejection rethrows the stored error unchanged.
    pub fn get(&self) -> Result<Arc<T>, ResolveError> {
        let scope = self.scope_core()?;
        let state = lock(&scope.state);
        match state.cache.get(&self.core.executor.id) {
            Some(CacheEntry::Resolved(value)) => {
                let value = value.clone();
                drop(state);
                self.downcast(value)
            }
            Some(CacheEntry::Rejected(err)) => Err((**err).clone()),
            Some(CacheEntry::Pending(_)) | None => Err(ResolveError::not_resolved(
                &self.core.executor.display_name(),
                "get",
            )),
        }
    }

    /// The cache entry as it stands, without triggering resolution.
    pub fn lookup(&self) -> Option<ResolveState<T>> {
        let scope = self.scope_core().ok()?;
        let state = lock(&scope.state);
        match state.cache.get(&self.core.executor.id) {
            Some(CacheEntry::Pending(_)) => Some(ResolveState::Pending),
            Some(CacheEntry::Resolved(value)) => {
                let value = value.clone();
                drop(state);
                Some(match self.downcast(value) {
                    Ok(typed) => ResolveState::Resolved(typed),
                    Err(err) => ResolveState::Rejected(err),
                })
            }
            Some(CacheEntry::Rejected(err)) => Some(ResolveState::Rejected((**err).clone())),
            None => None,
        }
    }

    /// Replace the value and propagate to reactive dependents.
    pub async fn update(&self, value: T) -> Result<(), ResolveError> {
        let scope = self.scope_core()?;
        scope
            .update_entry(&self.core.executor, NextValue::Value(Arc::new(value)))
            .await
    }

    /// Replace the value by applying `f` to the current one.
    pub async fn update_with<F>(&self, f: F) -> Result<(), ResolveError>
    where
        F: FnOnce(Arc<T>) -> T + Send + 'static,
    {
        let scope = self.scope_core()?;
        let name = self.core.executor.display_name();
        scope
            .update_entry(
                &self.core.executor,
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

    /// Release the executor, cascading through its reactive dependents.
    pub async fn release(&self) -> Result<(), ResolveError> {
        let scope = self.scope_core()?;
        scope.release_entry(&self.core.executor, false).await
    }

    /// Be notified with a fresh accessor whenever the executor updates.
    pub fn subscribe(
        &self,
        callback: impl Fn(Accessor<T>) + Send + Sync + 'static,
    ) -> Result<Subscription, ResolveError> {
        let scope = self.scope_core()?;
        let mut state = lock(&scope.state);
        if state.disposed {
            return Err(ResolveError::scope_disposed("subscribe"));
        }
        let id = state.next_callback_id();
        let executor_id = self.core.executor.id;
        state
            .reactive_dependents
            .entry(executor_id)
            .or_default()
            .push(ReactiveDependent::Callback {
                id,
                callback: Arc::new(move |handle: AccessorHandle| {
                    callback(Accessor::from_handle(handle));
                }),
            });
        drop(state);

        let weak = Arc::downgrade(&scope);
        Ok(Subscription::new(move || {
            if let Some(scope) = weak.upgrade() {
                let mut state = lock(&scope.state);
                if let Some(dependents) = state.reactive_dependents.get_mut(&executor_id) {
                    dependents.retain(|dependent| match dependent {
                        ReactiveDependent::Callback { id: dep_id, .. } => *dep_id != id,
                        ReactiveDependent::Executor(_) => true,
                    });
                }
            }
        }))
    }

    pub fn executor(&self) -> ExecutorRef {
        ExecutorRef {
            core: self.core.executor.clone(),
        }
    }

    /// The typed executor handle this accessor tracks.
    pub fn target(&self) -> Executor<T> {
        Executor::from_core(self.core.executor.clone())
    }
}
