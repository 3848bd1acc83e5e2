// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Scope construction.

use std::sync::Arc;

use crate::errors::ResolveError;
use crate::executor::Preset;
use crate::extension::Extension;
use crate::tag::Tagged;

use super::{Scope, ScopeCore};

/// Builder for a root scope with extensions, metas, and pre-resolved values.
///
/// ```rust
/// use the_arbor::executor::{preset, provide};
/// use the_arbor::scope::Scope;
/// use the_arbor::tag;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let port = provide(|_| async { Ok(8080u16) });
/// let scope = Scope::builder()
///     .meta(tag::name("api"))
///     .initial_value(preset(&port, 9090))
///     .build()
///     .await?;
///
/// assert_eq!(*scope.resolve(&port).await?, 9090);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ScopeBuilder {
    extensions: Vec<Arc<dyn Extension>>,
    metas: Vec<Tagged>,
    initial_values: Vec<Preset>,
}

impl ScopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn meta(mut self, entry: Tagged) -> Self {
        self.metas.push(entry);
        self
    }

    pub fn initial_value(mut self, preset: Preset) -> Self {
        self.initial_values.push(preset);
        self
    }

    /// Build the scope and run every extension's `init` hook in registration
    /// order.
    pub async fn build(self) -> Result<Scope, ResolveError> {
        let core = ScopeCore::root(self.extensions.clone(), self.metas);
        for preset in &self.initial_values {
            core.insert_preset(preset);
        }
        let scope = Scope { core };
        for extension in &self.extensions {
            if let Err(cause) = extension.init(&scope).await {
                let boxed: Box<dyn std::error::Error + Send + Sync> = cause.into();
                return Err(ResolveError::internal(format!(
                    "extension '{}' failed to initialize",
                    extension.name()
                ))
                .with_cause(Arc::from(boxed)));
            }
        }
        Ok(scope)
    }
}
