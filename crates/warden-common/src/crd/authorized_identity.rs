//! AuthorizedIdentity CRD: the running record of credentials issued to a subject
//!
//! One record exists per authenticated subject. Each issued credential
//! remembers where it came from (the generator or store), where its state
//! lives, and which workload asked for it, so the lifecycle reconciler can
//! tell when the credential is no longer backed by a live workload.

use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// AuthorizedIdentity tracks the credentials issued to one subject.
///
/// Example:
/// ```yaml
/// apiVersion: federation.warden.dev/v1alpha1
/// kind: AuthorizedIdentity
/// metadata:
///   name: identity-3b1f...
/// spec:
///   subject: system:serviceaccount:payments:api
///   provider: https://prod.k8s.example.com
///   method: oidc
///   credentials:
///     - sourceRef:
///         apiVersion: generators.warden.dev/v1alpha1
///         kind: Password
///         name: db-password
///         namespace: payments
///       stateRef:
///         name: gs-x7k2p
///         namespace: payments
///       workloadBinding:
///         kind: Pod
///         name: api-7f9c
///         uid: 0b6f...
///         namespace: payments
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "federation.warden.dev",
    version = "v1alpha1",
    kind = "AuthorizedIdentity",
    status = "AuthorizedIdentityStatus",
    printcolumn = r#"{"name":"Subject","type":"string","jsonPath":".spec.subject"}"#,
    printcolumn = r#"{"name":"Method","type":"string","jsonPath":".spec.method"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedIdentitySpec {
    /// Authenticated subject (SPIFFE ID or token `sub`)
    pub subject: String,

    /// Issuer or trust domain that authenticated the subject
    pub provider: String,

    /// Authentication method used
    pub method: AuthMethod,

    /// Credentials issued to this subject
    #[serde(default)]
    pub credentials: Vec<IssuedCredential>,
}

/// AuthorizedIdentity status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedIdentityStatus {
    /// Last time the lifecycle reconciler checked the credentials (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<String>,

    /// Credentials still live after the last reconcile
    #[serde(default)]
    pub live_credentials: u32,
}

/// Name of the AuthorizedIdentity record for a subject
///
/// Subjects contain characters that are not valid in object names
/// (`:`, `/`), so the record is named after a digest of the subject.
pub fn identity_name(subject: &str) -> String {
    let digest = Sha256::digest(subject.as_bytes());
    format!("identity-{}", hex::encode(&digest[..20]))
}

/// Authentication method of a request
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// OIDC bearer token
    Oidc,
    /// SPIFFE mTLS client certificate
    Spiffe,
}

impl AuthMethod {
    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oidc => "oidc",
            Self::Spiffe => "spiffe",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One credential issued to a subject
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCredential {
    /// Generator or store that produced the credential
    pub source_ref: SourceRef,

    /// Remote key the credential was read from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ref: Option<RemoteRef>,

    /// GeneratorState holding the generator's state for this credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_ref: Option<StateRef>,

    /// Workload the credential was issued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_binding: Option<WorkloadBinding>,

    /// When the credential was issued (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<String>,
}

impl IssuedCredential {
    /// True when two credentials describe the same source for the same workload
    pub fn same_slot(&self, other: &IssuedCredential) -> bool {
        self.source_ref == other.source_ref && self.workload_binding == other.workload_binding
    }
}

/// Reference to the object that produced a credential
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    /// API version of the source
    pub api_version: String,
    /// Kind of the source
    pub kind: String,
    /// Name of the source
    pub name: String,
    /// Namespace of the source, if namespaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Remote key a credential was read from
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRef {
    /// Key within the secret store
    pub key: String,
}

/// Reference to a GeneratorState object
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StateRef {
    /// GeneratorState name
    pub name: String,
    /// GeneratorState namespace
    pub namespace: String,
}

/// Kind of workload a credential is bound to
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    /// A pod
    Pod,
    /// A service account
    ServiceAccount,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pod => write!(f, "Pod"),
            Self::ServiceAccount => write!(f, "ServiceAccount"),
        }
    }
}

/// Workload a credential was issued to
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadBinding {
    /// Workload kind
    pub kind: WorkloadKind,
    /// Workload name
    pub name: String,
    /// Workload UID at issue time
    pub uid: String,
    /// Workload namespace
    pub namespace: String,
}
