//! Error types for the trust registry and federation providers

use thiserror::Error;

/// Result type for trust operations
pub type Result<T> = std::result::Result<T, TrustError>;

/// Trust error types
#[derive(Debug, Error)]
pub enum TrustError {
    /// No candidate federation produced a usable key set
    #[error("no keys found")]
    NoKeysFound,

    /// JWKS fetch error
    #[error("JWKS fetch error for {issuer}: {message}")]
    JwksFetch {
        /// Issuer or JWKS URL
        issuer: String,
        /// Error message
        message: String,
    },

    /// Identity existence check failed
    #[error("identity check error for {subject}: {message}")]
    IdentityCheck {
        /// Subject being checked
        subject: String,
        /// Error message
        message: String,
    },

    /// A federation object could not be turned into a provider
    #[error("configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl TrustError {
    /// Create a JWKS fetch error
    pub fn jwks_fetch(issuer: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::JwksFetch {
            issuer: issuer.into(),
            message: msg.into(),
        }
    }

    /// Create an identity check error
    pub fn identity_check(subject: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::IdentityCheck {
            subject: subject.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }
}
