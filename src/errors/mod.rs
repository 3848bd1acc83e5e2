// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod flow;
mod resolve;
mod tag;

pub use flow::{FlowError, ValidationTarget};
pub use resolve::{
    ErrorCategory, ErrorCode, ErrorContext, ErrorKind, ResolutionStage, ResolveError,
};
pub use tag::TagError;
