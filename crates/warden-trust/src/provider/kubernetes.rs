//! Kubernetes federation provider
//!
//! Verifies service account tokens issued by a (possibly remote) cluster.
//! Signing keys come from the issuer's JWKS endpoint, fetched with the
//! caller's own token: the default `system:service-account-issuer-discovery`
//! binding lets any service account read it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use warden_common::crd::KubernetesFederationSpec;
use warden_common::identity::ServiceAccountSubject;

use super::{FederationProvider, JwksRequest};
use crate::error::{Result, TrustError};
use crate::jwks::JwkSet;

/// Default timeout for issuer and API server requests
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for a Kubernetes provider
#[derive(Debug, Clone)]
pub struct KubernetesProviderConfig {
    /// Token issuer URL
    pub issuer: String,
    /// JWKS endpoint
    pub jwks_url: String,
    /// CA bundle for the issuer and API server (PEM)
    pub ca_bundle: Option<String>,
    /// API server used for identity existence checks
    pub api_server: Option<String>,
    /// Bearer token for the API server
    pub api_token: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl KubernetesProviderConfig {
    /// Build the provider settings from a KubernetesFederation spec
    ///
    /// `api_token` is the resolved content of `tokenSecretRef`, if any.
    pub fn from_spec(spec: &KubernetesFederationSpec, api_token: Option<String>) -> Self {
        Self {
            issuer: spec.issuer.clone(),
            jwks_url: spec.jwks_url(),
            ca_bundle: spec.ca_bundle.clone(),
            api_server: spec.api_server.clone(),
            api_token,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Provider for a Kubernetes service account token issuer
#[derive(Debug, Clone)]
pub struct KubernetesProvider {
    config: KubernetesProviderConfig,
    client: reqwest::Client,
}

impl KubernetesProvider {
    /// Create a provider; fails if the CA bundle is not valid PEM
    pub fn new(config: KubernetesProviderConfig) -> Result<Self> {
        let client = build_client(config.ca_bundle.as_deref(), config.timeout)?;
        Ok(Self { config, client })
    }

    /// Issuer served by this provider
    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// Client for a JWKS fetch
    ///
    /// A configured CA bundle always wins over the caller's hint.
    fn client_for(&self, ca_hint: Option<&str>) -> Result<reqwest::Client> {
        match (&self.config.ca_bundle, ca_hint) {
            (None, Some(hint)) => build_client(Some(hint), self.config.timeout),
            _ => Ok(self.client.clone()),
        }
    }
}

fn build_client(ca_pem: Option<&str>, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(pem) = ca_pem {
        let cert = reqwest::Certificate::from_pem(pem.as_bytes())
            .map_err(|e| TrustError::configuration(format!("invalid CA certificate: {}", e)))?;
        builder = builder.add_root_certificate(cert);
    }
    builder
        .build()
        .map_err(|e| TrustError::configuration(format!("failed to create HTTP client: {}", e)))
}

#[async_trait]
impl FederationProvider for KubernetesProvider {
    async fn get_jwks(&self, request: &JwksRequest) -> Result<JwkSet> {
        let url = &self.config.jwks_url;
        let client = self.client_for(request.ca_cert.as_deref())?;

        debug!(url = %url, "Fetching JWKS");
        let response = client
            .get(url)
            .bearer_auth(&request.token)
            .send()
            .await
            .map_err(|e| TrustError::jwks_fetch(url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(TrustError::jwks_fetch(
                url,
                format!("HTTP {}", response.status()),
            ));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| TrustError::jwks_fetch(url, format!("invalid JWKS document: {}", e)))
    }

    async fn check_identity_exists(&self, subject: &str) -> Result<bool> {
        let Some(api_server) = &self.config.api_server else {
            return Ok(true);
        };
        // Only service account subjects can be looked up
        let Some(sa) = ServiceAccountSubject::parse(subject) else {
            return Ok(true);
        };

        let url = format!(
            "{}/api/v1/namespaces/{}/serviceaccounts/{}",
            api_server.trim_end_matches('/'),
            sa.namespace,
            sa.name
        );
        let mut request = self.client.get(&url);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TrustError::identity_check(subject, e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(TrustError::identity_check(subject, format!("HTTP {}", status))),
        }
    }
}
