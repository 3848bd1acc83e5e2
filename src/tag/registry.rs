// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Process-wide tag key allocation.
//!
//! Labeled tags intern their label: constructing two tags with the same label
//! yields the same key, so independently-built crates can address the same
//! entry. Unlabeled tags mint a fresh key that no other tag can collide with.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

/// Identity of a tag. Equality on the key is the only identity tags have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagKey(u64);

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

fn labels() -> &'static Mutex<HashMap<String, TagKey>> {
    static LABELS: OnceLock<Mutex<HashMap<String, TagKey>>> = OnceLock::new();
    LABELS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Mint a key no label maps to.
pub(crate) fn fresh() -> TagKey {
    TagKey(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
}

/// Return the key interned for `label`, allocating it on first use.
pub(crate) fn intern(label: &str) -> TagKey {
    let mut map = labels().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(key) = map.get(label) {
        return *key;
    }
    let key = fresh();
    map.insert(label.to_string(), key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_labels_share_a_key() {
        assert_eq!(intern("arbor.test.shared"), intern("arbor.test.shared"));
    }

    #[test]
    fn fresh_keys_never_collide() {
        assert_ne!(fresh(), fresh());
        assert_ne!(fresh(), intern("arbor.test.other"));
    }
}
