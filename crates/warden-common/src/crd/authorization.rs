//! Authorization CRD binding one workload subject to its allow-lists
//!
//! An Authorization names a trust anchor (the federation that vouches for
//! the subject), exactly one subject, and the resources that subject may
//! touch: cluster secret stores, generators, and generator states.

use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::GeneratorRef;
use crate::error::Error;
use crate::identity::SpiffeId;

/// Authorization grants one subject access to secret stores and generators.
///
/// Example:
/// ```yaml
/// apiVersion: federation.warden.dev/v1alpha1
/// kind: Authorization
/// metadata:
///   name: payments-api
/// spec:
///   federationRef:
///     kind: KubernetesFederation
///     name: prod-cluster
///   subject:
///     oidc:
///       issuer: https://prod.k8s.example.com
///       subject: system:serviceaccount:payments:api
///   allowedClusterSecretStores:
///     - vault-payments
///   allowedGenerators:
///     - name: db-password
///       kind: Password
///       namespace: payments
///   allowedGeneratorStates:
///     - namespace: payments
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "federation.warden.dev",
    version = "v1alpha1",
    kind = "Authorization",
    printcolumn = r#"{"name":"Federation","type":"string","jsonPath":".spec.federationRef.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationSpec {
    /// Trust anchor that vouches for the subject
    pub federation_ref: FederationRef,

    /// The authenticated identity this policy applies to
    pub subject: Subject,

    /// Cluster secret stores the subject may read from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_cluster_secret_stores: Vec<String>,

    /// Generators the subject may invoke or revoke
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_generators: Vec<GeneratorRef>,

    /// Namespaces in which the subject may revoke generator states of others
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_generator_states: Vec<GeneratorStateScope>,
}

impl AuthorizationSpec {
    /// Validate the policy
    pub fn validate(&self) -> Result<(), Error> {
        if self.federation_ref.name.is_empty() {
            return Err(Error::validation("federationRef.name must not be empty"));
        }
        self.subject.validate()
    }
}

/// Kind of trust anchor referenced by a policy
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum FederationKind {
    /// OIDC issuer backed by a Kubernetes service account token issuer
    KubernetesFederation,
    /// SPIFFE trust domain authenticated with mTLS
    SpiffeFederation,
}

impl fmt::Display for FederationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KubernetesFederation => write!(f, "KubernetesFederation"),
            Self::SpiffeFederation => write!(f, "SpiffeFederation"),
        }
    }
}

/// Pointer to a federation object
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct FederationRef {
    /// Federation kind
    pub kind: FederationKind,
    /// Federation object name
    pub name: String,
}

impl FederationRef {
    /// Create a new federation reference
    pub fn new(kind: FederationKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for FederationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// The identity a policy applies to; exactly one field must be set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    /// SPIFFE identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spiffe: Option<SpiffeSubject>,

    /// OIDC issuer and subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcSubject>,
}

impl Subject {
    /// A SPIFFE subject
    pub fn spiffe(spiffe_id: impl Into<String>) -> Self {
        Self {
            spiffe: Some(SpiffeSubject {
                spiffe_id: spiffe_id.into(),
            }),
            oidc: None,
        }
    }

    /// An OIDC subject
    pub fn oidc(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            spiffe: None,
            oidc: Some(OidcSubject {
                issuer: issuer.into(),
                subject: subject.into(),
            }),
        }
    }

    /// Check that exactly one subject kind is set and that it is well formed
    pub fn validate(&self) -> Result<(), Error> {
        match (&self.spiffe, &self.oidc) {
            (Some(spiffe), None) => SpiffeId::parse(&spiffe.spiffe_id).map(|_| ()),
            (None, Some(oidc)) => {
                if oidc.issuer.is_empty() || oidc.subject.is_empty() {
                    Err(Error::validation("oidc subject requires issuer and subject"))
                } else {
                    Ok(())
                }
            }
            (Some(_), Some(_)) => Err(Error::validation(
                "subject must set exactly one of spiffe or oidc, not both",
            )),
            (None, None) => Err(Error::validation(
                "subject must set exactly one of spiffe or oidc",
            )),
        }
    }

    /// The identity string matched against an authenticated subject
    pub fn id(&self) -> Option<&str> {
        match (&self.spiffe, &self.oidc) {
            (Some(spiffe), None) => Some(spiffe.spiffe_id.as_str()),
            (None, Some(oidc)) => Some(oidc.subject.as_str()),
            _ => None,
        }
    }

    /// Registry key: SPIFFE trust domain or OIDC issuer
    pub fn trust_key(&self) -> Option<String> {
        match (&self.spiffe, &self.oidc) {
            (Some(spiffe), None) => SpiffeId::parse(&spiffe.spiffe_id)
                .ok()
                .map(|id| id.trust_domain().to_string()),
            (None, Some(oidc)) => Some(oidc.issuer.clone()),
            _ => None,
        }
    }
}

/// SPIFFE subject
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpiffeSubject {
    /// Full SPIFFE ID, e.g. `spiffe://cluster.local/app/ns/...`
    pub spiffe_id: String,
}

/// OIDC subject
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OidcSubject {
    /// Token issuer (`iss`)
    pub issuer: String,
    /// Token subject (`sub`)
    pub subject: String,
}

/// Namespace scope for generator state revocation
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorStateScope {
    /// Namespace whose generator states may be revoked
    pub namespace: String,
}
