// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The per-execution journal of keyed, at-most-once effects.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::errors::FlowError;
use crate::tag::AnyValue;

/// One journaled outcome: the stored value or the stored failure. Replays
/// return exactly what the first run produced.
#[derive(Clone)]
pub enum JournalEntry {
    Value(AnyValue),
    Error(FlowError),
}

impl JournalEntry {
    pub fn is_error(&self) -> bool {
        matches!(self, JournalEntry::Error(_))
    }
}

#[derive(Default)]
struct JournalEntries {
    order: Vec<String>,
    map: HashMap<String, JournalEntry>,
}

/// Keyed journal with first-occurrence ordering.
#[derive(Default)]
pub struct Journal {
    entries: Mutex<JournalEntries>,
}

/// Serializable view of one journal entry's status.
#[derive(Debug, Clone, Serialize)]
pub struct JournalRecord {
    pub key: String,
    pub failed: bool,
}

impl Journal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lookup(&self, key: &str) -> Option<JournalEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.map.get(key).cloned()
    }

    pub(crate) fn record_value(&self, key: &str, value: AnyValue) {
        self.record(key, JournalEntry::Value(value));
    }

    pub(crate) fn record_error(&self, key: &str, error: FlowError) {
        self.record(key, JournalEntry::Error(error));
    }

    fn record(&self, key: &str, entry: JournalEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.map.insert(key.to_string(), entry).is_none() {
            entries.order.push(key.to_string());
        }
    }

    /// Keys in first-occurrence order.
    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.order.clone()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry statuses in first-occurrence order, for inspection and export.
    pub fn snapshot(&self) -> Vec<JournalRecord> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .order
            .iter()
            .filter_map(|key| {
                entries.map.get(key).map(|entry| JournalRecord {
                    key: key.clone(),
                    failed: entry.is_error(),
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("len", &self.len()).finish()
    }
}
