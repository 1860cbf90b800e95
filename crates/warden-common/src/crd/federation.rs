//! Federation CRDs describing trust anchors
//!
//! A KubernetesFederation points at a cluster's service account token
//! issuer; tokens it signs are verified against its JWKS. A SpiffeFederation
//! names a SPIFFE trust domain whose workloads authenticate with mTLS.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{FederationStatus, SecretKeyRef};

/// KubernetesFederation trusts tokens issued by a Kubernetes cluster.
///
/// Example:
/// ```yaml
/// apiVersion: federation.warden.dev/v1alpha1
/// kind: KubernetesFederation
/// metadata:
///   name: prod-cluster
/// spec:
///   issuer: https://prod.k8s.example.com
///   caBundle: |
///     -----BEGIN CERTIFICATE-----
///     ...
///   apiServer: https://prod.k8s.example.com:6443
///   tokenSecretRef:
///     name: prod-reader
///     namespace: warden-system
///     key: token
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "federation.warden.dev",
    version = "v1alpha1",
    kind = "KubernetesFederation",
    status = "FederationStatus",
    printcolumn = r#"{"name":"Issuer","type":"string","jsonPath":".spec.issuer"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesFederationSpec {
    /// Token issuer URL; must equal the `iss` claim of accepted tokens
    pub issuer: String,

    /// JWKS endpoint override (default: `<issuer>/openid/v1/jwks`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_url: Option<String>,

    /// CA certificate for TLS verification of the issuer (PEM format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,

    /// API server used to check that service accounts still exist.
    /// When unset, identities are assumed to exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<String>,

    /// Bearer token for the API server, read from a Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret_ref: Option<SecretKeyRef>,
}

impl KubernetesFederationSpec {
    /// JWKS URL to fetch signing keys from
    pub fn jwks_url(&self) -> String {
        self.jwks_url
            .clone()
            .unwrap_or_else(|| format!("{}/openid/v1/jwks", self.issuer.trim_end_matches('/')))
    }
}

/// SpiffeFederation trusts workloads of one SPIFFE trust domain.
///
/// Example:
/// ```yaml
/// apiVersion: federation.warden.dev/v1alpha1
/// kind: SpiffeFederation
/// metadata:
///   name: mesh
/// spec:
///   trustDomain: cluster.local
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "federation.warden.dev",
    version = "v1alpha1",
    kind = "SpiffeFederation",
    status = "FederationStatus",
    printcolumn = r#"{"name":"TrustDomain","type":"string","jsonPath":".spec.trustDomain"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SpiffeFederationSpec {
    /// SPIFFE trust domain (e.g. "cluster.local")
    pub trust_domain: String,
}
