//! Request authentication
//!
//! Authenticators turn an inbound request into an [`AuthInfo`]. They are
//! tried in registration order; the first one that succeeds wins and, if
//! none does, the last error is reported to the client.

mod oidc;
mod spiffe;

pub use oidc::{extract_bearer_token, rsa_key_from_jwk, OidcAuthenticator};
pub use spiffe::{spiffe_id_from_der, SpiffeAuthenticator};

#[cfg(test)]
pub(crate) use oidc::tests as oidc_fixtures;
#[cfg(test)]
pub(crate) use spiffe::tests as spiffe_fixtures;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::HeaderMap;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use warden_common::crd::AuthMethod;
use warden_trust::TrustError;

use crate::cert::ClientCertChain;
use crate::error::Error;

/// Identity established for one request
#[derive(Debug, Clone, PartialEq)]
pub struct AuthInfo {
    /// How the caller authenticated
    pub method: AuthMethod,
    /// Issuer (OIDC) or trust domain (SPIFFE)
    pub provider: String,
    /// Token `sub` or full SPIFFE ID
    pub subject: String,
    /// Kubernetes workload coordinates, when the identity carries them
    pub kube_attributes: Option<KubeAttributes>,
}

/// Kubernetes coordinates of the calling workload
///
/// Deserializes from the `kubernetes.io` claim of projected service
/// account tokens.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KubeAttributes {
    /// Workload namespace
    pub namespace: String,
    /// Service account
    #[serde(default, rename = "serviceaccount")]
    pub service_account: Option<ObjectIdentity>,
    /// Pod, for pod-bound tokens
    #[serde(default)]
    pub pod: Option<ObjectIdentity>,
}

/// Name and UID of a Kubernetes object
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectIdentity {
    /// Object name
    pub name: String,
    /// Object UID
    pub uid: String,
}

/// The parts of a request authenticators may look at
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    /// Request headers
    pub headers: HeaderMap,
    /// Buffered request body
    pub body: Bytes,
    /// Client certificate chain presented on the TLS connection
    pub client_certs: Option<ClientCertChain>,
}

/// Authentication failures
#[derive(Debug, Error)]
pub enum AuthError {
    /// No bearer token on the request
    #[error("missing bearer token")]
    MissingToken,

    /// The token could not be parsed
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// No federation produced signing keys for the issuer
    #[error("{0}")]
    KeyResolution(#[from] TrustError),

    /// The key set has no key with the token's key ID
    #[error("no matching key id: {0}")]
    NoMatchingKey(String),

    /// JWK without a modulus
    #[error("n not found in key")]
    MissingModulus,

    /// JWK modulus is not base64url
    #[error("failed to decode modulus")]
    InvalidModulus,

    /// JWK without an exponent
    #[error("e not found in key")]
    MissingExponent,

    /// JWK exponent is not base64url
    #[error("failed to decode exponent")]
    InvalidExponent,

    /// Signature or claim validation failed; details are logged, not returned
    #[error("token validation failed")]
    TokenValidation,

    /// No client certificate on the connection
    #[error("no client certificate")]
    MissingCertificate,

    /// The client certificate does not carry a usable SPIFFE ID
    #[error("invalid client certificate: {0}")]
    InvalidCertificate(String),
}

/// A strategy for authenticating requests
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Establish the caller's identity
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthInfo, AuthError>;
}

/// Ordered set of named authenticators
#[derive(Clone, Default)]
pub struct AuthenticatorRegistry {
    authenticators: Vec<(String, Arc<dyn Authenticator>)>,
}

impl AuthenticatorRegistry {
    /// Create an empty registry (rejects every request)
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an authenticator; it is tried after those already registered
    pub fn register(mut self, name: impl Into<String>, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push((name.into(), authenticator));
        self
    }

    /// Registered authenticator names, in order
    pub fn names(&self) -> Vec<&str> {
        self.authenticators.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Authenticate a request with the first authenticator that accepts it
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<AuthInfo, Error> {
        let mut last_error: Option<AuthError> = None;

        for (name, authenticator) in &self.authenticators {
            match authenticator.authenticate(request).await {
                Ok(info) => {
                    debug!(
                        authenticator = %name,
                        method = %info.method,
                        provider = %info.provider,
                        subject = %info.subject,
                        "Request authenticated"
                    );
                    return Ok(info);
                }
                Err(e) => {
                    debug!(authenticator = %name, error = %e, "Authenticator rejected request");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => e.into(),
            None => Error::Unauthorized("no authenticators configured".into()),
        })
    }
}
