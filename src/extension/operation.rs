// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Operation descriptors handed to extension wraps.

use crate::executor::ExecutorRef;

/// Which parallel composition an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelMode {
    /// Rejects with the first rejection.
    Parallel,
    /// Never rejects from composition; results settle individually.
    ParallelSettled,
}

impl ParallelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParallelMode::Parallel => "parallel",
            ParallelMode::ParallelSettled => "parallel-settled",
        }
    }
}

/// Identity of a wrapped operation.
///
/// An extension may observe or transform the operation's result, but the
/// descriptor pins what is being executed: a wrap must not change which
/// executor is resolved or which flow runs.
#[derive(Debug, Clone)]
pub enum OperationDescriptor {
    /// A scope resolving an executor.
    Resolve { executor: ExecutorRef },
    /// A scope updating a resolved executor.
    Update { executor: ExecutorRef },
    /// A root flow execution.
    FlowRun { flow_name: String },
    /// A sub-flow execution, inner wrap.
    FlowExec {
        flow_name: String,
        parent_flow_name: Option<String>,
    },
    /// A sub-flow execution, outer wrap.
    Subflow {
        flow_name: String,
        parent_flow_name: Option<String>,
    },
    /// A parallel composition over sibling executions.
    Parallel { mode: ParallelMode, count: usize },
    /// A journaled operation keyed by the caller.
    Journal { key: String },
}

impl OperationDescriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            OperationDescriptor::Resolve { .. } => "resolve",
            OperationDescriptor::Update { .. } => "update",
            OperationDescriptor::FlowRun { .. } => "flow-run",
            OperationDescriptor::FlowExec { .. } => "flow-exec",
            OperationDescriptor::Subflow { .. } => "subflow",
            OperationDescriptor::Parallel { mode, .. } => match mode {
                ParallelMode::Parallel => "flow-parallel",
                ParallelMode::ParallelSettled => "flow-parallel-settled",
            },
            OperationDescriptor::Journal { .. } => "journal",
        }
    }
}
