// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Dependency specifications and their typed materialization.
//!
//! A dependency spec is one of four shapes: none, a single producer, an
//! ordered list, or a string-keyed record. The resolver materializes a spec
//! into matching [`ResolvedDeps`]; the [`DependencySet`] implementations then
//! rebuild the caller's typed view (`Arc<T>` values, [`Accessor`] handles,
//! tuples, or a [`ResolvedMap`]).

use std::collections::HashMap;
use std::sync::Arc;

use crate::scope::{Accessor, AccessorHandle};
use crate::tag::AnyValue;

use super::variant::{Lazy, Reactive, Static, Variant};
use super::{Executor, ExecutorCore};

/// One edge of a dependency spec: the producer plus the declared variant.
#[derive(Clone)]
pub struct DependencyRef {
    pub(crate) variant: Variant,
    pub(crate) target: Arc<ExecutorCore>,
}

impl DependencyRef {
    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn target_name(&self) -> String {
        self.target.display_name()
    }
}

impl std::fmt::Debug for DependencyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.variant.as_str(), self.target.display_name())
    }
}

/// The shape of an executor's dependencies.
#[derive(Debug, Clone, Default)]
pub enum DependencySpec {
    #[default]
    None,
    Single(DependencyRef),
    List(Vec<DependencyRef>),
    Record(Vec<(String, DependencyRef)>),
}

impl DependencySpec {
    /// All edges in declaration order.
    pub fn refs(&self) -> Vec<&DependencyRef> {
        match self {
            DependencySpec::None => Vec::new(),
            DependencySpec::Single(r) => vec![r],
            DependencySpec::List(refs) => refs.iter().collect(),
            DependencySpec::Record(entries) => entries.iter().map(|(_, r)| r).collect(),
        }
    }
}

/// A materialized edge: either the produced value or an accessor handle,
/// depending on the edge's variant.
#[derive(Clone)]
pub enum DepValue {
    Value(AnyValue),
    Accessor(AccessorHandle),
}

/// Materialized dependencies in the spec's shape.
pub enum ResolvedDeps {
    None,
    Single(DepValue),
    List(Vec<DepValue>),
    Record(Vec<(String, DepValue)>),
}

/// Shape or type disagreement between a spec and its materialized values.
/// Reaching this is a runtime defect, not a caller error.
#[derive(Debug, Clone)]
pub struct MaterializeError {
    pub message: String,
}

impl MaterializeError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A typed dependency spec: knows its edges and how to rebuild the typed
/// output from materialized values.
pub trait DependencySet {
    type Output: Send + 'static;

    fn spec(&self) -> DependencySpec;

    fn materialize(resolved: ResolvedDeps) -> Result<Self::Output, MaterializeError>;
}

/// A single edge usable inside tuples and records.
pub trait DependencyItem {
    type Output: Send + 'static;

    fn dependency_ref(&self) -> DependencyRef;

    fn materialize_item(value: DepValue) -> Result<Self::Output, MaterializeError>;
}

fn expect_value<T: Send + Sync + 'static>(value: DepValue) -> Result<Arc<T>, MaterializeError> {
    match value {
        DepValue::Value(v) => v
            .downcast::<T>()
            .map_err(|_| MaterializeError::new("dependency value has an unexpected type")),
        DepValue::Accessor(_) => Err(MaterializeError::new(
            "expected a produced value, found an accessor",
        )),
    }
}

fn expect_accessor<T: Send + Sync + 'static>(
    value: DepValue,
) -> Result<Accessor<T>, MaterializeError> {
    match value {
        DepValue::Accessor(handle) => Ok(Accessor::from_handle(handle)),
        DepValue::Value(_) => Err(MaterializeError::new(
            "expected an accessor, found a produced value",
        )),
    }
}

impl<T: Send + Sync + 'static> DependencyItem for Executor<T> {
    type Output = Arc<T>;

    fn dependency_ref(&self) -> DependencyRef {
        DependencyRef {
            variant: Variant::Base,
            target: self.core.clone(),
        }
    }

    fn materialize_item(value: DepValue) -> Result<Self::Output, MaterializeError> {
        expect_value::<T>(value)
    }
}

impl<T: Send + Sync + 'static> DependencyItem for Lazy<T> {
    type Output = Accessor<T>;

    fn dependency_ref(&self) -> DependencyRef {
        DependencyRef {
            variant: self.core.variant,
            target: self.target.clone(),
        }
    }

    fn materialize_item(value: DepValue) -> Result<Self::Output, MaterializeError> {
        expect_accessor::<T>(value)
    }
}

impl<T: Send + Sync + 'static> DependencyItem for Reactive<T> {
    type Output = Arc<T>;

    fn dependency_ref(&self) -> DependencyRef {
        DependencyRef {
            variant: self.core.variant,
            target: self.target.clone(),
        }
    }

    fn materialize_item(value: DepValue) -> Result<Self::Output, MaterializeError> {
        expect_value::<T>(value)
    }
}

impl<T: Send + Sync + 'static> DependencyItem for Static<T> {
    type Output = Accessor<T>;

    fn dependency_ref(&self) -> DependencyRef {
        DependencyRef {
            variant: self.core.variant,
            target: self.target.clone(),
        }
    }

    fn materialize_item(value: DepValue) -> Result<Self::Output, MaterializeError> {
        expect_accessor::<T>(value)
    }
}

impl<I: DependencyItem> DependencyItem for &I {
    type Output = I::Output;

    fn dependency_ref(&self) -> DependencyRef {
        (**self).dependency_ref()
    }

    fn materialize_item(value: DepValue) -> Result<Self::Output, MaterializeError> {
        I::materialize_item(value)
    }
}

// Single-edge specs.
macro_rules! single_item_set {
    ($name:ident) => {
        impl<T: Send + Sync + 'static> DependencySet for $name<T> {
            type Output = <$name<T> as DependencyItem>::Output;

            fn spec(&self) -> DependencySpec {
                DependencySpec::Single(self.dependency_ref())
            }

            fn materialize(resolved: ResolvedDeps) -> Result<Self::Output, MaterializeError> {
                match resolved {
                    ResolvedDeps::Single(value) => <$name<T> as DependencyItem>::materialize_item(value),
                    _ => Err(MaterializeError::new("expected a single dependency value")),
                }
            }
        }
    };
}

single_item_set!(Executor);
single_item_set!(Lazy);
single_item_set!(Reactive);
single_item_set!(Static);

impl DependencySet for () {
    type Output = ();

    fn spec(&self) -> DependencySpec {
        DependencySpec::None
    }

    fn materialize(resolved: ResolvedDeps) -> Result<Self::Output, MaterializeError> {
        match resolved {
            ResolvedDeps::None => Ok(()),
            _ => Err(MaterializeError::new("expected no dependency values")),
        }
    }
}

impl<D: DependencySet> DependencySet for &D {
    type Output = D::Output;

    fn spec(&self) -> DependencySpec {
        (**self).spec()
    }

    fn materialize(resolved: ResolvedDeps) -> Result<Self::Output, MaterializeError> {
        D::materialize(resolved)
    }
}

macro_rules! tuple_set {
    ($($item:ident),+) => {
        impl<$($item: DependencyItem),+> DependencySet for ($($item,)+) {
            type Output = ($($item::Output,)+);

            fn spec(&self) -> DependencySpec {
                #[allow(non_snake_case)]
                let ($($item,)+) = self;
                DependencySpec::List(vec![$($item.dependency_ref()),+])
            }

            fn materialize(resolved: ResolvedDeps) -> Result<Self::Output, MaterializeError> {
                let values = match resolved {
                    ResolvedDeps::List(values) => values,
                    _ => return Err(MaterializeError::new("expected a dependency list")),
                };
                let expected = 0usize $(+ { let _ = stringify!($item); 1 })+;
                if values.len() != expected {
                    return Err(MaterializeError::new(format!(
                        "expected {} dependency values, found {}",
                        expected,
                        values.len()
                    )));
                }
                let mut values = values.into_iter();
                Ok(($(
                    $item::materialize_item(
                        values.next().ok_or_else(|| MaterializeError::new("dependency list exhausted"))?,
                    )?,
                )+))
            }
        }
    };
}

tuple_set!(A);
tuple_set!(A, B);
tuple_set!(A, B, C);
tuple_set!(A, B, C, D);
tuple_set!(A, B, C, D, E);
tuple_set!(A, B, C, D, E, F);
tuple_set!(A, B, C, D, E, F, G);
tuple_set!(A, B, C, D, E, F, G, H);

/// The record dependency shape: named edges with per-name variants.
#[derive(Clone, Default)]
pub struct DepMap {
    entries: Vec<(String, DependencyRef)>,
}

impl DepMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named edge. Pass an `Executor` for a base edge, or one of the
    /// wrapper handles for lazy/reactive/static edges.
    pub fn with(mut self, key: impl Into<String>, item: impl DependencyItem) -> Self {
        self.entries.push((key.into(), item.dependency_ref()));
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl DependencySet for DepMap {
    type Output = ResolvedMap;

    fn spec(&self) -> DependencySpec {
        DependencySpec::Record(self.entries.clone())
    }

    fn materialize(resolved: ResolvedDeps) -> Result<Self::Output, MaterializeError> {
        match resolved {
            ResolvedDeps::Record(values) => Ok(ResolvedMap {
                values: values.into_iter().collect(),
            }),
            _ => Err(MaterializeError::new("expected a dependency record")),
        }
    }
}

/// Materialized record dependencies with typed getters.
pub struct ResolvedMap {
    values: HashMap<String, DepValue>,
}

impl ResolvedMap {
    /// Produced value of a base or reactive edge.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> anyhow::Result<Arc<T>> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("no dependency named '{}'", key))?;
        expect_value::<T>(value.clone()).map_err(|e| anyhow::anyhow!("'{}': {}", key, e.message))
    }

    /// Accessor of a lazy or static edge.
    pub fn accessor<T: Send + Sync + 'static>(&self, key: &str) -> anyhow::Result<Accessor<T>> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("no dependency named '{}'", key))?;
        expect_accessor::<T>(value.clone()).map_err(|e| anyhow::anyhow!("'{}': {}", key, e.message))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
