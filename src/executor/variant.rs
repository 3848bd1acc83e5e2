// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Consumption variants.
//!
//! A variant is the relationship a consumer declares toward a producer on a
//! dependency edge, not a property of the producer. The same executor can be
//! consumed as a produced value (`Base`), as a deferred handle (`Lazy`), as a
//! re-produced-on-update value (`Reactive`), or as a resolved-but-stable
//! handle (`Static`) by different consumers.
//!
//! Wrappers are referentially stable: constructing an executor creates
//! exactly one [`WrapperCore`] per variant, and every `.lazy()`,
//! `.reactive()`, or `.static_()` call hands out a typed view sharing it.

use std::marker::PhantomData;
use std::sync::Arc;

use super::{Executor, ExecutorCore, ExecutorRef};

/// The four edge relationships the resolver dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Resolve the target and hand the consumer its produced value.
    Base,
    /// Hand the consumer an accessor without triggering resolution.
    Lazy,
    /// Resolve the target, hand over the value, and re-produce the consumer
    /// whenever the target updates.
    Reactive,
    /// Resolve the target and hand the consumer an accessor; no reactive
    /// edge is recorded.
    Static,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Base => "base",
            Variant::Lazy => "lazy",
            Variant::Reactive => "reactive",
            Variant::Static => "static",
        }
    }
}

/// Identity of one variant wrapper over one executor. Allocated once at
/// executor construction; all handles of that variant share it.
pub(crate) struct WrapperCore {
    pub(crate) variant: Variant,
}

/// The three wrapper cores an executor owns.
pub(crate) struct Wrappers {
    pub(crate) lazy: Arc<WrapperCore>,
    pub(crate) reactive: Arc<WrapperCore>,
    pub(crate) static_: Arc<WrapperCore>,
}

impl Wrappers {
    pub(crate) fn new() -> Self {
        Self {
            lazy: Arc::new(WrapperCore {
                variant: Variant::Lazy,
            }),
            reactive: Arc::new(WrapperCore {
                variant: Variant::Reactive,
            }),
            static_: Arc::new(WrapperCore {
                variant: Variant::Static,
            }),
        }
    }
}

macro_rules! wrapper {
    ($(#[$doc:meta])* $name:ident, $slot:ident) => {
        $(#[$doc])*
        pub struct $name<T> {
            pub(crate) core: Arc<WrapperCore>,
            pub(crate) target: Arc<ExecutorCore>,
            pub(crate) _marker: PhantomData<fn() -> T>,
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self {
                    core: self.core.clone(),
                    target: self.target.clone(),
                    _marker: PhantomData,
                }
            }
        }

        impl<T> std::fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("target", &self.target.display_name())
                    .finish()
            }
        }

        impl<T: Send + Sync + 'static> $name<T> {
            pub(crate) fn over(target: Arc<ExecutorCore>) -> Self {
                Self {
                    core: target.wrappers.$slot.clone(),
                    target,
                    _marker: PhantomData,
                }
            }

            /// The wrapped producer.
            pub fn target(&self) -> Executor<T> {
                Executor::from_core(self.target.clone())
            }

            pub fn erased(&self) -> ExecutorRef {
                ExecutorRef {
                    core: self.target.clone(),
                }
            }
        }
    };
}

wrapper! {
    /// Lazy edge marker over a producer executor.
    Lazy, lazy
}
wrapper! {
    /// Reactive edge marker over a producer executor.
    Reactive, reactive
}
wrapper! {
    /// Static edge marker over a producer executor.
    Static, static_
}
