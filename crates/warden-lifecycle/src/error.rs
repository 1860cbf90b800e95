//! Error types for the credential lifecycle

use thiserror::Error;

use warden_common::store::StoreError;

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Lifecycle error types
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Optimistic writes kept losing to other writers
    #[error("gave up writing {name} after {attempts} attempts")]
    RetriesExhausted {
        /// Record name
        name: String,
        /// Attempts made
        attempts: usize,
    },
}

impl ReconcileError {
    /// Create a retries-exhausted error
    pub fn retries_exhausted(name: impl Into<String>, attempts: usize) -> Self {
        Self::RetriesExhausted {
            name: name.into(),
            attempts,
        }
    }

    /// Whether a later attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_conflict() || matches!(e, StoreError::Backend(_)),
            Self::Kube(_) | Self::RetriesExhausted { .. } => true,
        }
    }
}
