// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Built-in execution metadata tags.
//!
//! Every execution context seeds these into its local store, so handlers and
//! extensions read them with the ordinary tag API: `ctx.get(meta::depth())`.

use std::sync::OnceLock;

use crate::tag::Tag;

use super::journal::Journal;

/// Name of the flow this context executes.
pub fn flow_name() -> &'static Tag<String> {
    static TAG: OnceLock<Tag<String>> = OnceLock::new();
    TAG.get_or_init(|| Tag::labeled("flow.name"))
}

/// Name of the parent flow, absent on root executions.
pub fn parent_flow_name() -> &'static Tag<String> {
    static TAG: OnceLock<Tag<String>> = OnceLock::new();
    TAG.get_or_init(|| Tag::labeled("flow.parentName"))
}

/// Nesting depth: 0 for the root execution, +1 per sub-flow.
pub fn depth() -> &'static Tag<usize> {
    static TAG: OnceLock<Tag<usize>> = OnceLock::new();
    TAG.get_or_init(|| Tag::labeled("flow.depth"))
}

/// Whether this execution was marked as part of a parallel composition.
pub fn is_parallel() -> &'static Tag<bool> {
    static TAG: OnceLock<Tag<bool>> = OnceLock::new();
    TAG.get_or_init(|| Tag::labeled("flow.isParallel"))
}

/// The execution's live journal.
pub fn journal() -> &'static Tag<Journal> {
    static TAG: OnceLock<Tag<Journal>> = OnceLock::new();
    TAG.get_or_init(|| Tag::labeled("flow.journal"))
}
