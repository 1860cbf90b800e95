//! Shared types embedded in Warden CRDs

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a generator by name, kind and namespace
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorRef {
    /// Generator name
    pub name: String,
    /// Generator kind (e.g. "Password")
    pub kind: String,
    /// Namespace the generator lives in
    pub namespace: String,
}

impl GeneratorRef {
    /// Create a new generator reference
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for GeneratorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

/// Reference to a single key of a Kubernetes Secret
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Secret name
    pub name: String,
    /// Secret namespace
    pub namespace: String,
    /// Key within the secret data
    pub key: String,
}

/// Readiness phase reported by federation objects
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum FederationPhase {
    /// Not yet loaded into the trust registry
    #[default]
    Pending,
    /// Provider registered and serving lookups
    Ready,
    /// Provider could not be built from the spec
    Failed,
}

impl fmt::Display for FederationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Status shared by KubernetesFederation and SpiffeFederation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FederationStatus {
    /// Current phase
    #[serde(default)]
    pub phase: FederationPhase,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation observed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl FederationStatus {
    /// Status for a provider that was registered successfully
    pub fn ready(generation: Option<i64>) -> Self {
        Self {
            phase: FederationPhase::Ready,
            message: None,
            observed_generation: generation,
        }
    }

    /// Status for a provider that failed to load
    pub fn failed(generation: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            phase: FederationPhase::Failed,
            message: Some(message.into()),
            observed_generation: generation,
        }
    }
}
