//! SPIFFE federation provider

use async_trait::async_trait;

use super::{FederationProvider, JwksRequest};
use crate::error::Result;
use crate::jwks::JwkSet;

/// Provider for a SPIFFE trust domain
///
/// SPIFFE workloads authenticate with mTLS, so there are no token signing
/// keys to hand out. Identities are asserted by the certificate itself and
/// are always reported as existing.
#[derive(Debug, Clone)]
pub struct SpiffeProvider {
    trust_domain: String,
}

impl SpiffeProvider {
    /// Create a provider for a trust domain
    pub fn new(trust_domain: impl Into<String>) -> Self {
        Self {
            trust_domain: trust_domain.into(),
        }
    }

    /// Trust domain served by this provider
    pub fn trust_domain(&self) -> &str {
        &self.trust_domain
    }
}

#[async_trait]
impl FederationProvider for SpiffeProvider {
    async fn get_jwks(&self, _request: &JwksRequest) -> Result<JwkSet> {
        Ok(JwkSet::default())
    }

    async fn check_identity_exists(&self, _subject: &str) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spiffe_identities_always_exist() {
        let provider = SpiffeProvider::new("cluster.local");
        assert_eq!(provider.trust_domain(), "cluster.local");
        assert!(provider
            .check_identity_exists("spiffe://cluster.local/anything")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn spiffe_has_no_signing_keys() {
        let provider = SpiffeProvider::new("cluster.local");
        let request = JwksRequest {
            token: String::new(),
            issuer: "cluster.local".into(),
            ca_cert: None,
        };
        assert!(provider.get_jwks(&request).await.unwrap().is_empty());
    }
}
