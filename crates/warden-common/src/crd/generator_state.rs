//! GeneratorState CRD: persisted state of one generator invocation
//!
//! Generator states are labelled with the owning workload and the
//! generator that produced them so revocation can select them by label.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::GeneratorRef;

/// GeneratorState keeps what a generator needs to clean up or rotate a credential.
///
/// Example:
/// ```yaml
/// apiVersion: federation.warden.dev/v1alpha1
/// kind: GeneratorState
/// metadata:
///   generateName: gs-
///   namespace: payments
///   labels:
///     warden.dev/owner: api-7f9c
///     warden.dev/generator-name: db-password
///     warden.dev/generator-kind: Password
///     warden.dev/auth-method: oidc
/// spec:
///   generatorRef:
///     name: db-password
///     kind: Password
///     namespace: payments
///   state:
///     length: "32"
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "federation.warden.dev",
    version = "v1alpha1",
    kind = "GeneratorState",
    namespaced,
    printcolumn = r#"{"name":"Generator","type":"string","jsonPath":".spec.generatorRef.name"}"#,
    printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".spec.generatorRef.kind"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorStateSpec {
    /// Generator that produced this state
    pub generator_ref: GeneratorRef,

    /// Opaque generator state
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state: BTreeMap<String, String>,
}
