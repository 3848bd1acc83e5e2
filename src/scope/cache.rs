// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Cache entries.
//!
//! A scope holds at most one entry per executor. Concurrent resolutions of
//! the same executor share the `Pending` entry's future, so the factory runs
//! exactly once while the entry is live. Replacement is atomic: an entry is
//! swapped under the state lock, never mutated in place.

use std::sync::Arc;

use futures::future::{BoxFuture, Shared};

use crate::errors::ResolveError;
use crate::tag::AnyValue;

/// The in-flight resolution shared by all waiters.
pub(crate) type SharedResolution =
    Shared<BoxFuture<'static, Result<AnyValue, Arc<ResolveError>>>>;

/// One executor's state within a scope.
#[derive(Clone)]
pub(crate) enum CacheEntry {
    Pending(SharedResolution),
    Resolved(AnyValue),
    Rejected(Arc<ResolveError>),
}

impl CacheEntry {
    pub(crate) fn is_pending(&self) -> bool {
        matches!(self, CacheEntry::Pending(_))
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheEntry::Pending(_) => f.write_str("Pending"),
            CacheEntry::Resolved(_) => f.write_str("Resolved"),
            CacheEntry::Rejected(err) => write!(f, "Rejected({})", err.code.as_str()),
        }
    }
}
