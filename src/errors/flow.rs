// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors surfaced by flow execution and composition.

use std::fmt;
use std::sync::Arc;

use crate::errors::ResolveError;
use crate::schema::SchemaIssues;

/// Which schema of a flow definition rejected a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationTarget {
    Input,
    Output,
}

impl fmt::Display for ValidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationTarget::Input => f.write_str("input"),
            ValidationTarget::Output => f.write_str("output"),
        }
    }
}

/// Failure of a flow execution, a journaled operation, or a composition.
///
/// Clones share the underlying cause, so the same error can live in a journal
/// entry, a settled batch, and the rejection observed by the caller.
#[derive(Debug, Clone)]
pub enum FlowError {
    /// A definition schema rejected the input or the output.
    Validation {
        flow: String,
        target: ValidationTarget,
        issues: SchemaIssues,
    },
    /// The flow handler returned an error.
    Handler {
        flow: String,
        cause: Arc<anyhow::Error>,
    },
    /// A journaled operation failed; the stored error replays on every call
    /// with the same key.
    Task {
        key: String,
        cause: Arc<anyhow::Error>,
    },
    /// Resolving the flow's dependencies (or its pod) failed.
    Resolve(ResolveError),
    /// An extension short-circuited the operation with an error that is not
    /// one of the flow error shapes.
    Wrap { cause: Arc<anyhow::Error> },
    /// Handles passed to a composition do not share a single root execution.
    PodMismatch,
    /// `assert_all_fulfilled` observed rejected results.
    Unfulfilled { rejected: usize },
    /// The spawned execution task could not be joined.
    Join { message: String },
}

impl FlowError {
    pub fn handler(flow: impl Into<String>, cause: anyhow::Error) -> Self {
        FlowError::Handler {
            flow: flow.into(),
            cause: Arc::new(cause),
        }
    }

    pub fn task(key: impl Into<String>, cause: anyhow::Error) -> Self {
        FlowError::Task {
            key: key.into(),
            cause: Arc::new(cause),
        }
    }

    pub fn validation(flow: impl Into<String>, target: ValidationTarget, issues: SchemaIssues) -> Self {
        FlowError::Validation {
            flow: flow.into(),
            target,
            issues,
        }
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::Validation { flow, target, issues } => {
                write!(f, "flow '{}' {} validation failed: {}", flow, target, issues)
            }
            FlowError::Handler { flow, cause } => {
                write!(f, "flow '{}' handler failed: {}", flow, cause)
            }
            FlowError::Task { key, cause } => {
                write!(f, "journaled operation '{}' failed: {}", key, cause)
            }
            FlowError::Resolve(err) => write!(f, "{}", err),
            FlowError::Wrap { cause } => write!(f, "extension aborted operation: {}", cause),
            FlowError::PodMismatch => {
                f.write_str("flow handles do not originate from a single root execution")
            }
            FlowError::Unfulfilled { rejected } => {
                write!(f, "expected all results fulfilled, {} rejected", rejected)
            }
            FlowError::Join { message } => write!(f, "execution task failed: {}", message),
        }
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FlowError::Handler { cause, .. }
            | FlowError::Task { cause, .. }
            | FlowError::Wrap { cause } => {
                let cause: &(dyn std::error::Error + Send + Sync + 'static) =
                    cause.as_ref().as_ref();
                Some(cause)
            }
            FlowError::Resolve(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResolveError> for FlowError {
    fn from(err: ResolveError) -> Self {
        FlowError::Resolve(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_reports_target_and_issues() {
        let err = FlowError::validation(
            "checkout",
            ValidationTarget::Input,
            SchemaIssues::single("amount must be positive"),
        );
        let text = err.to_string();
        assert!(text.contains("checkout"));
        assert!(text.contains("input"));
        assert!(text.contains("amount must be positive"));
    }

    #[test]
    fn clones_share_the_cause() {
        let err = FlowError::handler("sync", anyhow::anyhow!("remote unavailable"));
        let clone = err.clone();
        match (&err, &clone) {
            (FlowError::Handler { cause: a, .. }, FlowError::Handler { cause: b, .. }) => {
                assert!(Arc::ptr_eq(a, b));
            }
            _ => panic!("expected handler errors"),
        }
    }
}
