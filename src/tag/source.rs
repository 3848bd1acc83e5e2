// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Polymorphic tag sources.
//!
//! Tag reads work against anything that can enumerate tagged entries: plain
//! slices and vectors, a [`Store`], or containers carrying a meta list
//! (executors, scopes, pods, flow contexts implement this in their own
//! modules). Pattern-matching on the source kind happens once, here, rather
//! than at every call site.

use super::store::Store;
use super::Tagged;

/// Anything tag reads can run against.
pub trait TagSource {
    /// Entries in insertion order. Later entries for the same key shadow
    /// earlier ones for `get`/`find`; `some` sees them all.
    fn tag_entries(&self) -> Vec<Tagged>;
}

impl TagSource for [Tagged] {
    fn tag_entries(&self) -> Vec<Tagged> {
        self.to_vec()
    }
}

impl TagSource for Vec<Tagged> {
    fn tag_entries(&self) -> Vec<Tagged> {
        self.clone()
    }
}

impl<const N: usize> TagSource for [Tagged; N] {
    fn tag_entries(&self) -> Vec<Tagged> {
        self.to_vec()
    }
}

impl TagSource for Store {
    fn tag_entries(&self) -> Vec<Tagged> {
        self.entries()
    }
}

impl<S: TagSource + ?Sized> TagSource for &S {
    fn tag_entries(&self) -> Vec<Tagged> {
        (**self).tag_entries()
    }
}
