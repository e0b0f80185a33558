//! Error types shared across the initialization subsystem.

use std::sync::Arc;

use thiserror::Error;

/// Opaque error type reported by a module's own initialize hook.
pub type ModuleError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal failure attached to a module initialization result.
///
/// Results are cloneable so they can be handed to the module observer and
/// kept by tests, hence the module-reported error is stored behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum InitializationError {
    /// The module reported a failure and the retry budget is exhausted.
    #[error("module initialization failed: {0}")]
    Module(Arc<dyn std::error::Error + Send + Sync>),
    /// The module is a consent adapter but another adapter was already
    /// active or selected; at most one is accepted.
    #[error("multiple consent adapter modules provided, at most one is accepted")]
    MultipleConsentAdapters,
}

impl InitializationError {
    /// Wraps a module-reported error.
    pub fn module(error: ModuleError) -> Self {
        Self::Module(error.into())
    }
}
