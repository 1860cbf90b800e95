//! Federation providers
//!
//! A provider answers two questions for a trust anchor: which keys sign its
//! tokens, and whether an identity it vouched for still exists. The variant
//! is picked by the `kind` of the federation reference.

mod kubernetes;
mod spiffe;

pub use kubernetes::{KubernetesProvider, KubernetesProviderConfig};
pub use spiffe::SpiffeProvider;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::error::{Result, TrustError};
use crate::jwks::JwkSet;
use crate::registry::{TrustRegistry, TrustedPolicy};

/// Input to a JWKS lookup
#[derive(Debug, Clone, PartialEq)]
pub struct JwksRequest {
    /// Raw bearer token being verified
    pub token: String,
    /// Unverified `iss` claim of the token
    pub issuer: String,
    /// CA certificate hint supplied by the caller (PEM)
    pub ca_cert: Option<String>,
}

/// Trust anchor capabilities
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FederationProvider: Send + Sync {
    /// Fetch the key set used to verify tokens from this federation
    async fn get_jwks(&self, request: &JwksRequest) -> Result<JwkSet>;

    /// Check whether an identity vouched for by this federation still exists
    async fn check_identity_exists(&self, subject: &str) -> Result<bool>;
}

/// Resolve a key set by walking the federations of candidate policies
///
/// Candidates are tried in registry order. The first provider that returns
/// a non-empty key set wins. Missing providers, errors, and empty sets move
/// on to the next candidate.
pub async fn resolve_jwks(
    registry: &TrustRegistry,
    candidates: &[TrustedPolicy],
    request: &JwksRequest,
) -> Result<JwkSet> {
    for policy in candidates {
        let federation = &policy.spec.federation_ref;
        let Some(provider) = registry.get_provider(federation) else {
            debug!(federation = %federation, policy = %policy.name, "No provider for federation");
            continue;
        };

        match provider.get_jwks(request).await {
            Ok(keys) if !keys.is_empty() => {
                debug!(federation = %federation, keys = keys.keys.len(), "Resolved JWKS");
                return Ok(keys);
            }
            Ok(_) => {
                debug!(federation = %federation, "Federation returned no keys");
            }
            Err(e) => {
                debug!(federation = %federation, error = %e, "JWKS lookup failed");
            }
        }
    }

    Err(TrustError::NoKeysFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use warden_common::crd::{AuthorizationSpec, FederationKind, FederationRef, Subject};

    use crate::jwks::Jwk;

    const ISSUER: &str = "https://issuer.example.com";

    fn policy(name: &str, federation: &str) -> TrustedPolicy {
        TrustedPolicy::new(
            name,
            AuthorizationSpec {
                federation_ref: FederationRef::new(FederationKind::KubernetesFederation, federation),
                subject: Subject::oidc(ISSUER, "sub"),
                allowed_cluster_secret_stores: vec![],
                allowed_generators: vec![],
                allowed_generator_states: vec![],
            },
        )
    }

    fn fed(name: &str) -> FederationRef {
        FederationRef::new(FederationKind::KubernetesFederation, name)
    }

    fn request() -> JwksRequest {
        JwksRequest {
            token: "t".into(),
            issuer: ISSUER.into(),
            ca_cert: None,
        }
    }

    fn keyset(kid: &str) -> JwkSet {
        JwkSet {
            keys: vec![Jwk {
                kty: "RSA".into(),
                kid: Some(kid.into()),
                ..Default::default()
            }],
        }
    }

    // ==========================================================================
    // Story: Resolution walks candidates until one yields keys
    // ==========================================================================

    #[tokio::test]
    async fn last_candidate_can_supply_the_keys() {
        let registry = TrustRegistry::new();

        let mut failing = MockFederationProvider::new();
        failing
            .expect_get_jwks()
            .times(1)
            .returning(|_| Err(TrustError::jwks_fetch(ISSUER, "connection refused")));
        let mut empty = MockFederationProvider::new();
        empty
            .expect_get_jwks()
            .times(1)
            .returning(|_| Ok(JwkSet::default()));
        let mut working = MockFederationProvider::new();
        working
            .expect_get_jwks()
            .times(1)
            .returning(|_| Ok(keyset("k1")));

        registry.add_provider(fed("a"), Arc::new(failing));
        registry.add_provider(fed("b"), Arc::new(empty));
        registry.add_provider(fed("c"), Arc::new(working));

        let candidates = vec![policy("p1", "a"), policy("p2", "b"), policy("p3", "c")];
        let keys = resolve_jwks(&registry, &candidates, &request()).await.unwrap();
        assert!(keys.get_by_kid("k1").is_some());
    }

    #[tokio::test]
    async fn first_success_stops_the_walk() {
        let registry = TrustRegistry::new();

        let mut first = MockFederationProvider::new();
        first.expect_get_jwks().times(1).returning(|_| Ok(keyset("k1")));
        let mut second = MockFederationProvider::new();
        second.expect_get_jwks().never();

        registry.add_provider(fed("a"), Arc::new(first));
        registry.add_provider(fed("b"), Arc::new(second));

        let candidates = vec![policy("p1", "a"), policy("p2", "b")];
        let keys = resolve_jwks(&registry, &candidates, &request()).await.unwrap();
        assert!(keys.get_by_kid("k1").is_some());
    }

    #[tokio::test]
    async fn all_candidates_failing_reports_no_keys_found() {
        let registry = TrustRegistry::new();

        let mut failing = MockFederationProvider::new();
        failing
            .expect_get_jwks()
            .returning(|_| Err(TrustError::jwks_fetch(ISSUER, "status 500")));
        registry.add_provider(fed("a"), Arc::new(failing));

        // "missing" has no provider at all
        let candidates = vec![policy("p1", "a"), policy("p2", "missing")];
        let err = resolve_jwks(&registry, &candidates, &request())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no keys found");
    }

    #[tokio::test]
    async fn no_candidates_reports_no_keys_found() {
        let registry = TrustRegistry::new();
        let err = resolve_jwks(&registry, &[], &request()).await.unwrap_err();
        assert!(matches!(err, TrustError::NoKeysFound));
    }

    #[tokio::test]
    async fn request_is_forwarded_to_the_provider() {
        let registry = TrustRegistry::new();
        let mut provider = MockFederationProvider::new();
        provider
            .expect_get_jwks()
            .withf(|req| req.issuer == ISSUER && req.ca_cert.as_deref() == Some("PEM"))
            .returning(|_| Ok(keyset("k1")));
        registry.add_provider(fed("a"), Arc::new(provider));

        let mut req = request();
        req.ca_cert = Some("PEM".into());
        assert!(resolve_jwks(&registry, &[policy("p1", "a")], &req).await.is_ok());
    }
}
