// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Flow definitions: name plus optional input/output schemas.

use std::sync::Arc;

use crate::errors::{FlowError, ValidationTarget};
use crate::schema::Schema;

/// Inspectable description of a flow. Any subset of the fields may be set;
/// validation runs only where a schema is present.
pub struct FlowDefinition<I, O> {
    pub name: Option<String>,
    pub input: Option<Arc<dyn Schema<I>>>,
    pub output: Option<Arc<dyn Schema<O>>>,
}

impl<I, O> Clone for FlowDefinition<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
        }
    }
}

impl<I, O> Default for FlowDefinition<I, O> {
    fn default() -> Self {
        Self {
            name: None,
            input: None,
            output: None,
        }
    }
}

impl<I, O> std::fmt::Debug for FlowDefinition<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowDefinition")
            .field("name", &self.name)
            .field("input", &self.input.is_some())
            .field("output", &self.output.is_some())
            .finish()
    }
}

impl<I, O> FlowDefinition<I, O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn input_schema(mut self, schema: Arc<dyn Schema<I>>) -> Self {
        self.input = Some(schema);
        self
    }

    pub fn output_schema(mut self, schema: Arc<dyn Schema<O>>) -> Self {
        self.output = Some(schema);
        self
    }

    /// The name used in contexts, journal keys, and errors.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "anonymous".to_string())
    }

    pub(crate) fn validate_input(&self, input: I) -> Result<I, FlowError> {
        match &self.input {
            Some(schema) => schema.validate(input).map_err(|issues| {
                FlowError::validation(self.display_name(), ValidationTarget::Input, issues)
            }),
            None => Ok(input),
        }
    }

    pub(crate) fn validate_output(&self, output: O) -> Result<O, FlowError> {
        match &self.output {
            Some(schema) => schema.validate(output).map_err(|issues| {
                FlowError::validation(self.display_name(), ValidationTarget::Output, issues)
            }),
            None => Ok(output),
        }
    }
}
