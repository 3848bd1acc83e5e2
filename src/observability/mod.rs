// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! This module provides centralized message types for all diagnostic and
//! operational logging in the runtime. Message types follow a struct-based
//! pattern with `Display` trait implementation to:
//!
//! * Eliminate magic strings scattered throughout the codebase
//! * Enable future internationalization without code changes
//! * Provide consistent, structured logging output
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::scope` - resolution, update, release, and disposal events
//! * `messages::flow` - flow execution, journaling, and parallel events
//!
//! # Usage
//!
//! ```rust
//! use the_arbor::observability::messages::scope::ResolutionFailed;
//!
//! let msg = ResolutionFailed {
//!     executor: "database",
//!     code: "factory-failed",
//! };
//!
//! tracing::warn!("{}", msg);
//! ```

pub mod messages;
