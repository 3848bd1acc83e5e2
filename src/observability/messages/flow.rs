// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for flow execution, journaling, and parallel composition.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A flow execution started.
///
/// # Log Level
/// `info!` at depth 0, `debug!` for sub-flows
pub struct FlowStarted<'a> {
    pub flow: &'a str,
    pub depth: usize,
}

impl Display for FlowStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Starting flow '{}' at depth {}", self.flow, self.depth)
    }
}

impl StructuredLog for FlowStarted<'_> {
    fn log(&self) {
        if self.depth == 0 {
            tracing::info!(flow = self.flow, depth = self.depth, "{}", self);
        } else {
            tracing::debug!(flow = self.flow, depth = self.depth, "{}", self);
        }
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "flow",
            span_name = name,
            flow = self.flow,
            depth = self.depth,
        )
    }
}

/// A flow execution finished.
///
/// # Log Level
/// `info!` on success at depth 0, `debug!` otherwise; `warn!` on failure
pub struct FlowFinished<'a> {
    pub flow: &'a str,
    pub depth: usize,
    pub success: bool,
}

impl Display for FlowFinished<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Flow '{}' at depth {} {}",
            self.flow,
            self.depth,
            if self.success { "completed" } else { "failed" }
        )
    }
}

impl StructuredLog for FlowFinished<'_> {
    fn log(&self) {
        if !self.success {
            tracing::warn!(flow = self.flow, depth = self.depth, "{}", self);
        } else if self.depth == 0 {
            tracing::info!(flow = self.flow, depth = self.depth, "{}", self);
        } else {
            tracing::debug!(flow = self.flow, depth = self.depth, "{}", self);
        }
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "flow_finish",
            span_name = name,
            flow = self.flow,
            success = self.success,
        )
    }
}

/// A journaled operation replayed a stored outcome instead of running.
///
/// # Log Level
/// `debug!` - Expected in replay-heavy handlers
pub struct JournalReplayed<'a> {
    pub key: &'a str,
    pub stored_error: bool,
}

impl Display for JournalReplayed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Journal replayed '{}' ({})",
            self.key,
            if self.stored_error { "error" } else { "value" }
        )
    }
}

impl StructuredLog for JournalReplayed<'_> {
    fn log(&self) {
        tracing::debug!(key = self.key, stored_error = self.stored_error, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("journal_replay", span_name = name, key = self.key)
    }
}

/// A parallel composition was entered.
///
/// # Log Level
/// `debug!` - High-volume operational event
pub struct ParallelStarted<'a> {
    pub mode: &'a str,
    pub count: usize,
}

impl Display for ParallelStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Entering {} composition over {} executions",
            self.mode, self.count
        )
    }
}

impl StructuredLog for ParallelStarted<'_> {
    fn log(&self) {
        tracing::debug!(mode = self.mode, count = self.count, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "parallel",
            span_name = name,
            mode = self.mode,
            count = self.count,
        )
    }
}
