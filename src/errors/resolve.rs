// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Structured errors for executor resolution, update, and release.
//!
//! Every failure that reaches a caller carries a machine-readable `code` and
//! `kind`, a `category` separating caller mistakes from runtime defects, and a
//! `context` with the executor name, the dependency chain that led to the
//! failure, and the resolution stage. The original cause is preserved
//! unchanged behind an `Arc` so all waiters on a shared pending resolution
//! observe the same error.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Machine-readable failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The executor's factory returned an error.
    FactoryFailed,
    /// The dependency graph contains a cycle through this executor.
    DependencyCycle,
    /// A dependency of this executor failed to resolve.
    DependencyResolutionFailed,
    /// A schema rejected a value at a validation site.
    ValidationFailed,
    /// The scope was disposed before or during the operation.
    ScopeDisposed,
    /// A required tag entry was missing from its source.
    TagNotFound,
    /// An internal invariant was violated.
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FactoryFailed => "factory-failed",
            ErrorCode::DependencyCycle => "dependency-cycle",
            ErrorCode::DependencyResolutionFailed => "dependency-resolution-failed",
            ErrorCode::ValidationFailed => "validation-failed",
            ErrorCode::ScopeDisposed => "scope-disposed",
            ErrorCode::TagNotFound => "tag-not-found",
            ErrorCode::Internal => "internal",
        }
    }
}

/// Coarse classification of where a failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FactoryExecution,
    DependencyResolution,
    ExecutorResolution,
    ScopeDisposed,
    Validation,
    TagNotFound,
    Internal,
}

/// Whether the failure is attributable to caller-supplied code or to the
/// runtime itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    User,
    System,
}

/// The stage of the resolution pipeline a failure was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionStage {
    DependencyResolution,
    FactoryExecution,
    Update,
    Cleanup,
    Validation,
    Disposal,
}

impl fmt::Display for ResolutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResolutionStage::DependencyResolution => "dependency resolution",
            ResolutionStage::FactoryExecution => "factory execution",
            ResolutionStage::Update => "update",
            ResolutionStage::Cleanup => "cleanup",
            ResolutionStage::Validation => "validation",
            ResolutionStage::Disposal => "disposal",
        };
        f.write_str(label)
    }
}

/// Diagnostic context captured at the failure site.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Display name of the executor the operation targeted, when known.
    pub executor_name: Option<String>,
    /// Names along the resolution path, outermost first.
    pub dependency_chain: Vec<String>,
    pub stage: ResolutionStage,
    pub timestamp: SystemTime,
    /// Free-form structured extras attached by extensions or the runtime.
    pub extras: Option<serde_json::Value>,
}

impl ErrorContext {
    pub fn new(stage: ResolutionStage) -> Self {
        Self {
            executor_name: None,
            dependency_chain: Vec::new(),
            stage,
            timestamp: SystemTime::now(),
            extras: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.executor_name = Some(name.into());
        self
    }

    pub fn with_chain(mut self, chain: Vec<String>) -> Self {
        self.dependency_chain = chain;
        self
    }
}

/// A resolution failure with preserved cause.
///
/// Cloning is cheap: the cause is shared behind an `Arc`, so the error stored
/// in a rejected cache entry and the errors returned to every waiter are the
/// same object.
#[derive(Debug, Clone)]
pub struct ResolveError {
    pub code: ErrorCode,
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub context: ErrorContext,
    message: String,
    cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ResolveError {
    pub fn new(
        code: ErrorCode,
        kind: ErrorKind,
        category: ErrorCategory,
        context: ErrorContext,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            kind,
            category,
            context,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the original cause, preserved verbatim.
    pub fn with_cause(mut self, cause: Arc<dyn std::error::Error + Send + Sync + 'static>) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Wrap a user error produced inside a factory.
    pub fn factory_failed(name: &str, chain: Vec<String>, cause: anyhow::Error) -> Self {
        let message = format!("factory for '{}' failed: {}", name, cause);
        let boxed: Box<dyn std::error::Error + Send + Sync> = cause.into();
        Self::new(
            ErrorCode::FactoryFailed,
            ErrorKind::FactoryExecution,
            ErrorCategory::User,
            ErrorContext::new(ResolutionStage::FactoryExecution)
                .named(name)
                .with_chain(chain),
            message,
        )
        .with_cause(Arc::from(boxed))
    }

    /// A cycle was found in the dependency graph. `chain` names the cycle,
    /// ending with the executor that re-entered it.
    pub fn cycle(chain: Vec<String>) -> Self {
        let message = format!("dependency cycle detected: {}", chain.join(" -> "));
        Self::new(
            ErrorCode::DependencyCycle,
            ErrorKind::DependencyResolution,
            ErrorCategory::User,
            ErrorContext::new(ResolutionStage::DependencyResolution).with_chain(chain),
            message,
        )
    }

    /// A dependency of `name` failed; the downstream error is the cause.
    pub fn dependency_failed(name: &str, chain: Vec<String>, cause: Arc<ResolveError>) -> Self {
        let message = format!(
            "dependency of '{}' failed to resolve: {}",
            name, cause.message
        );
        Self::new(
            ErrorCode::DependencyResolutionFailed,
            ErrorKind::DependencyResolution,
            ErrorCategory::User,
            ErrorContext::new(ResolutionStage::DependencyResolution)
                .named(name)
                .with_chain(chain),
            message,
        )
        .with_cause(cause)
    }

    pub fn scope_disposed(operation: &str) -> Self {
        Self::new(
            ErrorCode::ScopeDisposed,
            ErrorKind::ScopeDisposed,
            ErrorCategory::User,
            ErrorContext::new(ResolutionStage::Disposal),
            format!("scope is disposed; '{}' is no longer available", operation),
        )
    }

    pub fn not_resolved(name: &str, operation: &str) -> Self {
        Self::new(
            ErrorCode::Internal,
            ErrorKind::ExecutorResolution,
            ErrorCategory::User,
            ErrorContext::new(ResolutionStage::Update).named(name),
            format!("'{}' requires '{}' to be resolved", operation, name),
        )
    }

    /// A cleanup hook failed. Swallowed by the caller, reported through
    /// error callbacks.
    pub fn cleanup_failed(name: &str, cause: anyhow::Error) -> Self {
        let message = format!("cleanup for '{}' failed: {}", name, cause);
        let boxed: Box<dyn std::error::Error + Send + Sync> = cause.into();
        Self::new(
            ErrorCode::Internal,
            ErrorKind::Internal,
            ErrorCategory::User,
            ErrorContext::new(ResolutionStage::Cleanup).named(name),
            message,
        )
        .with_cause(Arc::from(boxed))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::Internal,
            ErrorKind::Internal,
            ErrorCategory::System,
            ErrorContext::new(ResolutionStage::FactoryExecution),
            message,
        )
    }

    pub fn validation(name: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ValidationFailed,
            ErrorKind::Validation,
            ErrorCategory::User,
            ErrorContext::new(ResolutionStage::Validation).named(name),
            message,
        )
    }

    /// The preserved original cause, if any.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.context.dependency_chain.is_empty() {
            write!(f, " (chain: {})", self.context.dependency_chain.join(" -> "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_names_the_full_path() {
        let err = ResolveError::cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.code, ErrorCode::DependencyCycle);
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn factory_error_preserves_cause() {
        let err = ResolveError::factory_failed(
            "db",
            vec!["app".into(), "db".into()],
            anyhow::anyhow!("connection refused"),
        );
        assert_eq!(err.code, ErrorCode::FactoryFailed);
        assert_eq!(err.category, ErrorCategory::User);
        assert!(err.cause().is_some());
        assert!(err.to_string().contains("connection refused"));
        assert!(err.to_string().contains("app -> db"));
    }

    #[test]
    fn dependency_failure_chains_downstream_error() {
        let inner = Arc::new(ResolveError::factory_failed(
            "db",
            vec!["db".into()],
            anyhow::anyhow!("boom"),
        ));
        let outer = ResolveError::dependency_failed("app", vec!["app".into()], inner);
        assert_eq!(outer.code, ErrorCode::DependencyResolutionFailed);
        assert!(std::error::Error::source(&outer).is_some());
    }
}
