//! Error types for context store operations.

use thiserror::Error;

use crate::keys::ProtectedKey;

/// Result type for context store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in context store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Attempted to overwrite a protected field through [`InvokeStore::set`].
    ///
    /// Protected fields can only be seeded by the initial `run` call.
    ///
    /// [`InvokeStore::set`]: crate::InvokeStore::set
    #[error("cannot modify protected field '{key}'")]
    ProtectedField {
        /// The protected key the caller tried to write.
        key: ProtectedKey,
    },

    /// The store implementation returned without completing the work it was
    /// handed.
    #[error("context store did not run the work to completion")]
    WorkNotRun,
}

impl StoreError {
    /// Whether this error is a protected-field violation.
    pub fn is_protected_field(&self) -> bool {
        matches!(self, StoreError::ProtectedField { .. })
    }
}
