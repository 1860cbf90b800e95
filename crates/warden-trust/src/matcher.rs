//! Authorization policy matching
//!
//! A policy matches a request when its subject equals the authenticated
//! subject and the requested resource appears in the allow-list for that
//! resource shape. The first matching policy wins.

use std::fmt;

use warden_common::crd::{AuthorizationSpec, GeneratorRef};

use crate::registry::TrustedPolicy;

/// A resource a caller asks to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRequest {
    /// Invoke or revoke a generator
    Generator(GeneratorRef),
    /// Read from a cluster secret store
    SecretStore {
        /// Store name
        name: String,
    },
    /// Revoke generator states in a namespace
    GeneratorState {
        /// Target namespace
        namespace: String,
    },
}

impl fmt::Display for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generator(generator) => write!(f, "generator {}", generator),
            Self::SecretStore { name } => write!(f, "secret store {}", name),
            Self::GeneratorState { namespace } => write!(f, "generator states in {}", namespace),
        }
    }
}

impl ResourceRequest {
    /// True when the policy's allow-list for this resource shape covers it
    pub fn allowed_by(&self, spec: &AuthorizationSpec) -> bool {
        match self {
            Self::Generator(generator) => spec.allowed_generators.contains(generator),
            Self::SecretStore { name } => spec.allowed_cluster_secret_stores.contains(name),
            Self::GeneratorState { namespace } => spec
                .allowed_generator_states
                .iter()
                .any(|scope| &scope.namespace == namespace),
        }
    }
}

/// Find the first policy that grants `subject` access to `request`
pub fn match_policy<'a>(
    policies: &'a [TrustedPolicy],
    subject: &str,
    request: &ResourceRequest,
) -> Option<&'a TrustedPolicy> {
    policies
        .iter()
        .find(|policy| policy.spec.subject.id() == Some(subject) && request.allowed_by(&policy.spec))
}
