// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Validation adapter contract.
//!
//! The runtime never validates values itself; it accepts anything implementing
//! [`Schema`] and calls `validate` at the documented validation sites (tag
//! writes, flow input/output). A schema either returns the value, possibly
//! canonicalized, or a list of [`SchemaIssues`].
//!
//! Two adapters cover the common cases: [`typed`] wraps a closure, and
//! [`json`] round-trips the value through `serde_json` so any type with serde
//! derives gets a structural shape check for free.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Validates values of type `T`, optionally canonicalizing them.
pub trait Schema<T>: Send + Sync {
    fn validate(&self, value: T) -> Result<T, SchemaIssues>;
}

/// A single validation finding with an optional path into the value.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaIssue {
    pub path: Vec<String>,
    pub message: String,
}

impl SchemaIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: Vec::new(),
            message: message.into(),
        }
    }

    pub fn at(mut self, segment: impl Into<String>) -> Self {
        self.path.push(segment.into());
        self
    }
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path.join("."), self.message)
        }
    }
}

/// The issue list a failed validation produces.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaIssues {
    pub issues: Vec<SchemaIssue>,
}

impl SchemaIssues {
    pub fn single(message: impl Into<String>) -> Self {
        Self {
            issues: vec![SchemaIssue::new(message)],
        }
    }

    pub fn push(&mut self, issue: SchemaIssue) {
        self.issues.push(issue);
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }
}

impl fmt::Display for SchemaIssues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        f.write_str(&rendered.join("; "))
    }
}

struct ClosureSchema<T, F> {
    validate: F,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, F> Schema<T> for ClosureSchema<T, F>
where
    F: Fn(T) -> Result<T, SchemaIssues> + Send + Sync,
{
    fn validate(&self, value: T) -> Result<T, SchemaIssues> {
        (self.validate)(value)
    }
}

/// Wrap a validation closure as a [`Schema`].
pub fn typed<T, F>(validate: F) -> Arc<dyn Schema<T>>
where
    T: Send + Sync + 'static,
    F: Fn(T) -> Result<T, SchemaIssues> + Send + Sync + 'static,
{
    Arc::new(ClosureSchema {
        validate,
        _marker: PhantomData,
    })
}

struct JsonSchema<T> {
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> Schema<T> for JsonSchema<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn validate(&self, value: T) -> Result<T, SchemaIssues> {
        let encoded = serde_json::to_value(&value)
            .map_err(|e| SchemaIssues::single(format!("not serializable: {}", e)))?;
        serde_json::from_value(encoded)
            .map_err(|e| SchemaIssues::single(format!("shape mismatch: {}", e)))
    }
}

/// A structural schema backed by a serde round-trip. The deserialized value is
/// returned, so serde-level canonicalization (defaults, renames) applies.
pub fn json<T>() -> Arc<dyn Schema<T>>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    Arc::new(JsonSchema {
        _marker: PhantomData,
    })
}
