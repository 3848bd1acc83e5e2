// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Tags: keyed, optionally schema-validated values attached to executors,
//! scopes, pods, stores, and flow contexts.
//!
//! A [`Tag`] pairs a [`TagKey`] with an expected value type, an optional
//! schema, and an optional default. Producing an entry goes through
//! [`Tag::of`]; reads (`get`/`find`/`some`) run against any [`TagSource`].
//! Labeled tags intern their label process-wide, so two crates constructing
//! `Tag::<String>::labeled("service.name")` address the same entry.
//!
//! ```rust
//! use the_arbor::tag::{self, Store};
//!
//! let retries = tag::custom::<u32>().with_default(3);
//! let store = Store::new();
//!
//! assert_eq!(*retries.get(&store).unwrap(), 3);
//! retries.set(&store, 5).unwrap();
//! assert_eq!(*retries.get(&store).unwrap(), 5);
//! ```

mod registry;
mod source;
mod store;

pub use registry::TagKey;
pub use source::TagSource;
pub use store::{AnyValue, Store};

use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use crate::errors::TagError;
use crate::schema::Schema;

/// A single keyed entry: the tag's key plus a type-erased value.
#[derive(Clone)]
pub struct Tagged {
    key: TagKey,
    value: AnyValue,
}

impl Tagged {
    pub(crate) fn from_parts(key: TagKey, value: AnyValue) -> Self {
        Self { key, value }
    }

    pub fn key(&self) -> TagKey {
        self.key
    }

    pub(crate) fn value(&self) -> &AnyValue {
        &self.value
    }

    pub(crate) fn into_value(self) -> AnyValue {
        self.value
    }

    /// Whether this entry was produced by `tag` (same key).
    pub fn is<T: Send + Sync + 'static>(&self, tag: &Tag<T>) -> bool {
        self.key == tag.key
    }
}

impl std::fmt::Debug for Tagged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tagged").field("key", &self.key).finish()
    }
}

/// A typed tag definition.
pub struct Tag<T> {
    key: TagKey,
    label: Option<String>,
    default: Option<Arc<T>>,
    schema: Option<Arc<dyn Schema<T>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Tag<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            label: self.label.clone(),
            default: self.default.clone(),
            schema: self.schema.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Tag<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tag")
            .field("key", &self.key)
            .field("label", &self.label)
            .finish()
    }
}

impl<T: Send + Sync + 'static> Tag<T> {
    /// A tag with a fresh, unshared key.
    pub fn new() -> Self {
        Self {
            key: registry::fresh(),
            label: None,
            default: None,
            schema: None,
            _marker: PhantomData,
        }
    }

    /// A tag addressing the process-wide key interned for `label`.
    pub fn labeled(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            key: registry::intern(&label),
            label: Some(label),
            default: None,
            schema: None,
            _marker: PhantomData,
        }
    }

    pub fn with_default(mut self, value: T) -> Self {
        self.default = Some(Arc::new(value));
        self
    }

    pub fn with_schema(mut self, schema: Arc<dyn Schema<T>>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn key(&self) -> TagKey {
        self.key
    }

    /// Label if the tag was labeled, else a key-derived placeholder used in
    /// error messages.
    pub fn label(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("{:?}", self.key),
        }
    }

    /// Produce an entry for `value`, validating against the schema if one is
    /// attached.
    pub fn of(&self, value: T) -> Result<Tagged, TagError> {
        let value = self.check(value)?;
        Ok(Tagged {
            key: self.key,
            value: Arc::new(value),
        })
    }

    /// Alias for [`Tag::of`], matching the store-seeding vocabulary.
    pub fn entry(&self, value: T) -> Result<Tagged, TagError> {
        self.of(value)
    }

    /// An entry carrying the tag's default. Fails when no default is set.
    pub fn default_entry(&self) -> Result<Tagged, TagError> {
        match &self.default {
            Some(value) => Ok(Tagged {
                key: self.key,
                value: value.clone(),
            }),
            None => Err(TagError::NotFound {
                label: self.label(),
            }),
        }
    }

    /// Last matching value, or the tag's default, or `TagError::NotFound`.
    pub fn get<S: TagSource + ?Sized>(&self, source: &S) -> Result<Arc<T>, TagError> {
        if let Some(found) = self.find(source) {
            return Ok(found);
        }
        match &self.default {
            Some(value) => Ok(value.clone()),
            None => Err(TagError::NotFound {
                label: self.label(),
            }),
        }
    }

    /// Last matching value, ignoring the default.
    pub fn find<S: TagSource + ?Sized>(&self, source: &S) -> Option<Arc<T>> {
        source
            .tag_entries()
            .into_iter()
            .rev()
            .find(|entry| entry.key == self.key)
            .and_then(|entry| entry.value.downcast::<T>().ok())
    }

    /// All matching values in insertion order.
    pub fn some<S: TagSource + ?Sized>(&self, source: &S) -> Vec<Arc<T>> {
        source
            .tag_entries()
            .into_iter()
            .filter(|entry| entry.key == self.key)
            .filter_map(|entry| entry.value.downcast::<T>().ok())
            .collect()
    }

    /// Validate and write the value into a store, replacing any previous
    /// entry for this key.
    pub fn set(&self, store: &Store, value: T) -> Result<(), TagError> {
        let value = self.check(value)?;
        store.insert(self.key, Arc::new(value));
        Ok(())
    }

    fn check(&self, value: T) -> Result<T, TagError> {
        match &self.schema {
            Some(schema) => schema.validate(value).map_err(|issues| TagError::Validation {
                label: self.label(),
                issues,
            }),
            None => Ok(value),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Tag<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A tag with a fresh key and no schema. The common way to declare
/// caller-defined context keys.
pub fn custom<T: Send + Sync + 'static>() -> Tag<T> {
    Tag::new()
}

/// The well-known name tag, used to label executors and scopes for
/// diagnostics and error messages.
pub fn name_tag() -> &'static Tag<String> {
    static NAME: OnceLock<Tag<String>> = OnceLock::new();
    NAME.get_or_init(|| Tag::labeled("arbor.name"))
}

/// Convenience constructor for a name entry.
pub fn name(value: impl Into<String>) -> Tagged {
    Tagged {
        key: name_tag().key(),
        value: Arc::new(value.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{self, SchemaIssues};

    #[test]
    fn round_trip_through_store() {
        let limit = custom::<u32>();
        let store = Store::new();
        limit.set(&store, 8).unwrap();
        assert_eq!(*limit.get(&store).unwrap(), 8);
    }

    #[test]
    fn get_falls_back_to_default_then_errors() {
        let retries = Tag::<u32>::new().with_default(3);
        let empty: Vec<Tagged> = Vec::new();
        assert_eq!(*retries.get(&empty).unwrap(), 3);

        let bare = custom::<u32>();
        assert!(matches!(
            bare.get(&empty),
            Err(TagError::NotFound { .. })
        ));
    }

    #[test]
    fn some_preserves_insertion_order() {
        let label = custom::<&'static str>();
        let entries = vec![
            label.of("first").unwrap(),
            name("ignored"),
            label.of("second").unwrap(),
        ];
        let values: Vec<&str> = label.some(&entries).iter().map(|v| **v).collect();
        assert_eq!(values, vec!["first", "second"]);
    }

    #[test]
    fn find_prefers_the_latest_entry() {
        let level = custom::<u8>();
        let entries = vec![level.of(1).unwrap(), level.of(2).unwrap()];
        assert_eq!(*level.find(&entries).unwrap(), 2);
    }

    #[test]
    fn schema_rejects_on_of_and_set() {
        let nonempty = Tag::<String>::new().with_schema(schema::typed(|v: String| {
            if v.is_empty() {
                Err(SchemaIssues::single("must not be empty"))
            } else {
                Ok(v)
            }
        }));
        assert!(matches!(
            nonempty.of(String::new()),
            Err(TagError::Validation { .. })
        ));
        let store = Store::new();
        assert!(nonempty.set(&store, "ok".into()).is_ok());
    }

    #[test]
    fn labeled_tags_share_entries() {
        let writer = Tag::<u64>::labeled("arbor.test.trace-id");
        let reader = Tag::<u64>::labeled("arbor.test.trace-id");
        let store = Store::new();
        writer.set(&store, 42).unwrap();
        assert_eq!(*reader.get(&store).unwrap(), 42);
    }

    #[test]
    fn wrong_type_reads_as_absent() {
        let as_text = Tag::<String>::labeled("arbor.test.mixed");
        let as_number = Tag::<u32>::labeled("arbor.test.mixed");
        let store = Store::new();
        as_number.set(&store, 7).unwrap();
        assert!(as_text.find(&store).is_none());
    }
}
