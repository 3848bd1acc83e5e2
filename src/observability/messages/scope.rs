// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for scope lifecycle and resolution events.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// An executor's factory produced a value.
///
/// # Log Level
/// `debug!` - High-volume operational event
pub struct ExecutorResolved<'a> {
    pub executor: &'a str,
    pub reactive_edges: usize,
}

impl Display for ExecutorResolved<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Resolved '{}' ({} reactive edges)",
            self.executor, self.reactive_edges
        )
    }
}

impl StructuredLog for ExecutorResolved<'_> {
    fn log(&self) {
        tracing::debug!(
            executor = self.executor,
            reactive_edges = self.reactive_edges,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "resolve",
            span_name = name,
            executor = self.executor,
        )
    }
}

/// An executor's resolution rejected.
///
/// # Log Level
/// `warn!` - Failure surfaced to waiters
pub struct ResolutionFailed<'a> {
    pub executor: &'a str,
    pub code: &'a str,
}

impl Display for ResolutionFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Resolution of '{}' failed ({})", self.executor, self.code)
    }
}

impl StructuredLog for ResolutionFailed<'_> {
    fn log(&self) {
        tracing::warn!(executor = self.executor, code = self.code, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "resolution_failure",
            span_name = name,
            executor = self.executor,
            code = self.code,
        )
    }
}

/// An update finished propagating through the reactive subgraph.
///
/// # Log Level
/// `debug!` - High-volume operational event
pub struct UpdatePropagated<'a> {
    pub executor: &'a str,
    pub dependents: usize,
}

impl Display for UpdatePropagated<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Updated '{}', re-produced {} dependents",
            self.executor, self.dependents
        )
    }
}

impl StructuredLog for UpdatePropagated<'_> {
    fn log(&self) {
        tracing::debug!(
            executor = self.executor,
            dependents = self.dependents,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "update",
            span_name = name,
            executor = self.executor,
            dependents = self.dependents,
        )
    }
}

/// A cleanup hook failed; the failure was swallowed and reported.
///
/// # Log Level
/// `warn!` - Resource may not have been released
pub struct CleanupFailed<'a> {
    pub executor: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for CleanupFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Cleanup for '{}' failed: {}", self.executor, self.error)
    }
}

impl StructuredLog for CleanupFailed<'_> {
    fn log(&self) {
        tracing::warn!(executor = self.executor, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "cleanup_failure",
            span_name = name,
            executor = self.executor,
        )
    }
}

/// A scope or pod finished disposing.
///
/// # Log Level
/// `info!` - Important lifecycle event
pub struct ScopeDisposed {
    pub released: usize,
    pub pod: bool,
}

impl Display for ScopeDisposed {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Disposed {} with {} cached executors released",
            if self.pod { "pod" } else { "scope" },
            self.released
        )
    }
}

impl StructuredLog for ScopeDisposed {
    fn log(&self) {
        tracing::info!(released = self.released, pod = self.pod, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "dispose",
            span_name = name,
            released = self.released,
            pod = self.pod,
        )
    }
}

/// A pod was created under a scope or another pod.
///
/// # Log Level
/// `debug!` - High-volume in flow-heavy workloads
pub struct PodCreated {
    pub depth: usize,
    pub presets: usize,
}

impl Display for PodCreated {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Created pod at depth {} with {} presets",
            self.depth, self.presets
        )
    }
}

impl StructuredLog for PodCreated {
    fn log(&self) {
        tracing::debug!(depth = self.depth, presets = self.presets, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("pod", span_name = name, depth = self.depth)
    }
}
