// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging and tracing.
//!
//! Each operational event is a small struct implementing `Display` for
//! human-readable output and [`StructuredLog`] for machine-readable fields
//! and span creation. Keeping the message text here, rather than inline at
//! call sites, keeps wording consistent and greppable.
//!
//! Messages are organized by subsystem:
//! * `scope` - resolution, update propagation, release, and disposal events
//! * `flow` - flow execution, journaling, and parallel composition events

pub mod flow;
pub mod scope;

use std::fmt::Display;
use tracing::Span;

/// Emit the message with structured fields, or create a span carrying them.
pub trait StructuredLog: Display {
    fn log(&self);

    fn span(&self, name: &str) -> Span;
}
