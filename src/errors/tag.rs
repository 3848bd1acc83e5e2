// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors for tag lookup and tag schema validation.

use thiserror::Error;

use crate::schema::SchemaIssues;

/// Errors that can occur reading or writing tagged values.
#[derive(Debug, Clone, Error)]
pub enum TagError {
    /// No entry for the tag exists in the source and the tag has no default.
    #[error("no value for tag '{label}' in source")]
    NotFound { label: String },

    /// An entry exists but its stored type does not match the tag's type.
    #[error("value for tag '{label}' has an unexpected type")]
    WrongType { label: String },

    /// The tag's schema rejected the value.
    #[error("tag '{label}' failed validation: {issues}")]
    Validation { label: String, issues: SchemaIssues },
}
