// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Keyed value store with insertion order.
//!
//! A `Store` maps tag keys to type-erased values. It backs the per-flow local
//! context and the per-scope extension context. Writes replace the value for
//! a key but keep its original position, so iteration order is first-insertion
//! order.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::registry::TagKey;
use super::Tagged;

/// A resolved or tagged value with its concrete type erased.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct StoreEntries {
    order: Vec<TagKey>,
    values: HashMap<TagKey, AnyValue>,
}

/// Symbol-keyed mutable mapping used as a tag source and sink.
#[derive(Default)]
pub struct Store {
    entries: Mutex<StoreEntries>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the value for `key`.
    pub fn insert(&self, key: TagKey, value: AnyValue) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.values.insert(key, value).is_none() {
            entries.order.push(key);
        }
    }

    /// Seed the store from a tagged entry.
    pub fn seed(&self, entry: Tagged) {
        self.insert(entry.key(), entry.into_value());
    }

    pub fn get(&self, key: TagKey) -> Option<AnyValue> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values.get(&key).cloned()
    }

    pub fn contains(&self, key: TagKey) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values.contains_key(&key)
    }

    /// Snapshot of all entries in first-insertion order.
    pub fn entries(&self) -> Vec<Tagged> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .order
            .iter()
            .filter_map(|key| {
                entries
                    .values
                    .get(key)
                    .map(|value| Tagged::from_parts(*key, value.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("len", &self.len()).finish()
    }
}
