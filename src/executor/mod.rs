// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Executors: immutable descriptions of lazily-computed values.
//!
//! An executor pairs an async factory with a dependency spec and an ordered
//! meta list. Executors carry no state of their own; a [`crate::scope::Scope`]
//! owns the produced values. Identity is by reference: two `provide` calls
//! with identical factories are two distinct executors.
//!
//! ```rust
//! use the_arbor::executor::{derive, provide};
//! use the_arbor::scope::Scope;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let host = provide(|_| async { Ok("localhost".to_string()) });
//! let url = derive(&host, |host, _| async move { Ok(format!("http://{}", host)) });
//!
//! let scope = Scope::new();
//! assert_eq!(*scope.resolve(&url).await?, "http://localhost");
//! # Ok(())
//! # }
//! ```

mod dependency;
mod variant;

pub use dependency::{
    DepMap, DepValue, DependencyItem, DependencyRef, DependencySet, DependencySpec,
    MaterializeError, ResolvedDeps, ResolvedMap,
};
pub use variant::{Lazy, Reactive, Static, Variant};

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::scope::Controller;
use crate::tag::{name_tag, AnyValue, TagSource, Tagged};

/// Process-unique executor identity.
pub(crate) type ExecutorId = u64;

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> ExecutorId {
    NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed)
}

/// Factory failures, split so the resolver can classify them.
pub(crate) enum FactoryError {
    /// The caller-supplied producer returned an error.
    User(anyhow::Error),
    /// The materialized dependencies did not match the spec.
    Shape(String),
}

pub(crate) type FactoryFuture = BoxFuture<'static, Result<AnyValue, FactoryError>>;

pub(crate) type Factory = Arc<dyn Fn(ResolvedDeps, Controller) -> FactoryFuture + Send + Sync>;

/// The erased heart of an executor. Immutable after construction.
pub(crate) struct ExecutorCore {
    pub(crate) id: ExecutorId,
    pub(crate) factory: Factory,
    pub(crate) dependencies: DependencySpec,
    pub(crate) metas: Vec<Tagged>,
    /// One wrapper core per variant, allocated here so wrapper handles are
    /// referentially stable.
    pub(crate) wrappers: variant::Wrappers,
}

impl ExecutorCore {
    /// Name from the name tag, or a stable id-derived fallback.
    pub(crate) fn display_name(&self) -> String {
        match name_tag().find(&self.metas) {
            Some(name) => (*name).clone(),
            None => format!("executor#{}", self.id),
        }
    }
}

impl std::fmt::Debug for ExecutorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorCore")
            .field("id", &self.id)
            .field("name", &self.display_name())
            .finish()
    }
}

/// Typed handle to an executor. Cloning is cheap and preserves identity.
pub struct Executor<T> {
    pub(crate) core: Arc<ExecutorCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Executor<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Executor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("id", &self.core.id)
            .field("name", &self.core.display_name())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Executor<T> {
    pub(crate) fn from_core(core: Arc<ExecutorCore>) -> Self {
        Self {
            core,
            _marker: PhantomData,
        }
    }

    /// Lazy edge over this executor: the consumer receives an accessor and
    /// resolution is deferred until the consumer asks for it.
    pub fn lazy(&self) -> Lazy<T> {
        Lazy::over(self.core.clone())
    }

    /// Reactive edge: the consumer receives the produced value and is
    /// re-produced whenever this executor updates.
    pub fn reactive(&self) -> Reactive<T> {
        Reactive::over(self.core.clone())
    }

    /// Static edge: the target is resolved, the consumer receives an
    /// accessor whose current value is readable synchronously.
    pub fn static_(&self) -> Static<T> {
        Static::over(self.core.clone())
    }

    pub fn name(&self) -> String {
        self.core.display_name()
    }

    pub fn metas(&self) -> &[Tagged] {
        &self.core.metas
    }

    /// Identity-preserving untyped reference, used in callbacks and
    /// operation descriptors.
    pub fn erased(&self) -> ExecutorRef {
        ExecutorRef {
            core: self.core.clone(),
        }
    }
}

impl<T> TagSource for Executor<T> {
    fn tag_entries(&self) -> Vec<Tagged> {
        self.core.metas.clone()
    }
}

/// Untyped executor reference with identity semantics.
#[derive(Clone)]
pub struct ExecutorRef {
    pub(crate) core: Arc<ExecutorCore>,
}

impl ExecutorRef {
    pub fn name(&self) -> String {
        self.core.display_name()
    }

    pub fn metas(&self) -> &[Tagged] {
        &self.core.metas
    }

    /// Same underlying executor.
    pub fn is(&self, other: &ExecutorRef) -> bool {
        self.core.id == other.core.id
    }
}

impl PartialEq for ExecutorRef {
    fn eq(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }
}

impl Eq for ExecutorRef {}

impl std::fmt::Debug for ExecutorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExecutorRef({})", self.core.display_name())
    }
}

impl TagSource for ExecutorRef {
    fn tag_entries(&self) -> Vec<Tagged> {
        self.core.metas.clone()
    }
}

/// An executor with no dependencies.
pub fn provide<T, F, Fut>(factory: F) -> Executor<T>
where
    T: Send + Sync + 'static,
    F: Fn(Controller) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    provide_with(Vec::new(), factory)
}

/// An executor with no dependencies and the given metas.
pub fn provide_with<T, F, Fut>(metas: Vec<Tagged>, factory: F) -> Executor<T>
where
    T: Send + Sync + 'static,
    F: Fn(Controller) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let erased: Factory = Arc::new(move |_deps, controller| {
        let fut = factory(controller);
        async move {
            fut.await
                .map(|value| Arc::new(value) as AnyValue)
                .map_err(FactoryError::User)
        }
        .boxed()
    });
    Executor::from_core(Arc::new(ExecutorCore {
        id: next_id(),
        factory: erased,
        dependencies: DependencySpec::None,
        metas,
        wrappers: variant::Wrappers::new(),
    }))
}

/// An executor produced from its dependencies.
pub fn derive<D, T, F, Fut>(deps: D, factory: F) -> Executor<T>
where
    D: DependencySet,
    T: Send + Sync + 'static,
    F: Fn(D::Output, Controller) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    derive_with(deps, Vec::new(), factory)
}

/// An executor produced from its dependencies, with the given metas.
pub fn derive_with<D, T, F, Fut>(deps: D, metas: Vec<Tagged>, factory: F) -> Executor<T>
where
    D: DependencySet,
    T: Send + Sync + 'static,
    F: Fn(D::Output, Controller) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let spec = deps.spec();
    let materialize: fn(ResolvedDeps) -> Result<D::Output, MaterializeError> = D::materialize;
    let erased: Factory = Arc::new(move |resolved, controller| {
        let typed = match materialize(resolved) {
            Ok(typed) => typed,
            Err(err) => {
                return futures::future::ready(Err(FactoryError::Shape(err.message))).boxed()
            }
        };
        let fut = factory(typed, controller);
        async move {
            fut.await
                .map(|value| Arc::new(value) as AnyValue)
                .map_err(FactoryError::User)
        }
        .boxed()
    });
    Executor::from_core(Arc::new(ExecutorCore {
        id: next_id(),
        factory: erased,
        dependencies: spec,
        metas,
        wrappers: variant::Wrappers::new(),
    }))
}

/// A pre-resolved cache seed for a scope or pod.
pub struct Preset {
    pub(crate) core: Arc<ExecutorCore>,
    pub(crate) value: AnyValue,
}

impl Preset {
    pub fn executor(&self) -> ExecutorRef {
        ExecutorRef {
            core: self.core.clone(),
        }
    }
}

impl std::fmt::Debug for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Preset({})", self.core.display_name())
    }
}

/// Seed `executor` as already resolved to `value`.
pub fn preset<T: Send + Sync + 'static>(executor: &Executor<T>, value: T) -> Preset {
    Preset {
        core: executor.core.clone(),
        value: Arc::new(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag;

    #[test]
    fn executors_have_distinct_identities() {
        let a = provide(|_| async { Ok(1u32) });
        let b = provide(|_| async { Ok(1u32) });
        assert_ne!(a.core.id, b.core.id);
        assert!(a.erased().is(&a.erased()));
        assert!(!a.erased().is(&b.erased()));
    }

    #[test]
    fn name_comes_from_the_name_tag() {
        let plain = provide(|_| async { Ok(()) });
        assert!(plain.name().starts_with("executor#"));

        let named = provide_with(vec![tag::name("config")], |_| async { Ok(()) });
        assert_eq!(named.name(), "config");
    }

    #[test]
    fn wrappers_share_the_target_core() {
        let counter = provide(|_| async { Ok(0u64) });
        let lazy = counter.lazy();
        let reactive = counter.reactive();
        assert!(Arc::ptr_eq(&lazy.target, &counter.core));
        assert!(Arc::ptr_eq(&reactive.target, &counter.core));
        assert_eq!(lazy.dependency_ref().variant(), Variant::Lazy);
        assert_eq!(reactive.dependency_ref().variant(), Variant::Reactive);
    }

    #[test]
    fn wrappers_are_referentially_stable() {
        let counter = provide(|_| async { Ok(0u64) });

        // Repeated calls hand out views over the same per-variant core.
        let first = counter.lazy();
        let second = counter.lazy();
        assert!(Arc::ptr_eq(&first.core, &second.core));
        assert!(Arc::ptr_eq(&counter.reactive().core, &counter.reactive().core));
        assert!(Arc::ptr_eq(&counter.static_().core, &counter.static_().core));

        // Distinct variants and distinct executors have distinct cores.
        assert!(!Arc::ptr_eq(&counter.lazy().core, &counter.reactive().core));
        let other = provide(|_| async { Ok(0u64) });
        assert!(!Arc::ptr_eq(&counter.lazy().core, &other.lazy().core));
    }

    #[test]
    fn tuple_specs_preserve_edge_order() {
        let a = provide(|_| async { Ok(1u32) });
        let b = provide(|_| async { Ok("b".to_string()) });
        let spec = (&a, b.static_()).spec();
        match spec {
            DependencySpec::List(refs) => {
                assert_eq!(refs.len(), 2);
                assert_eq!(refs[0].variant(), Variant::Base);
                assert_eq!(refs[1].variant(), Variant::Static);
            }
            other => panic!("expected a list spec, got {:?}", other),
        }
    }

    #[test]
    fn record_specs_keep_their_keys() {
        let db = provide(|_| async { Ok("db".to_string()) });
        let log = provide(|_| async { Ok("log".to_string()) });
        let map = DepMap::new().with("db", &db).with("log", log.lazy());
        let keys: Vec<&str> = map.keys().collect();
        assert_eq!(keys, vec!["db", "log"]);
    }
}
