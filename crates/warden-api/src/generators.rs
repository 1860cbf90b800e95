//! Generator collaborators
//!
//! A generator mints a credential for a workload and hands back the data to
//! return to the caller plus opaque state to persist. Generators are looked
//! up by kind.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use warden_common::crd::{AuthMethod, GeneratorRef};

use crate::auth::AuthInfo;
use crate::error::Error;

/// Default length of generated passwords
pub const DEFAULT_PASSWORD_LENGTH: usize = 32;

/// Kubernetes coordinates of the workload a credential is generated for
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerAttributes {
    /// Workload namespace
    pub namespace: String,
    /// Issuer or trust domain that vouched for the workload
    pub issuer: String,
    /// Service account UID
    pub service_account_uid: String,
    /// Service account name
    pub service_account_name: String,
    /// Pod UID, for pod-bound identities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_uid: Option<String>,
}

/// The resource a generator acts on behalf of
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Generator name
    pub name: String,
    /// Pod name if the identity is pod-bound, else the service account name
    pub owner: String,
    /// Workload coordinates
    pub owner_attributes: OwnerAttributes,
    /// How the caller authenticated
    pub auth_method: AuthMethod,
}

impl Resource {
    /// Derive the resource from an authenticated identity
    pub fn from_auth_info(name: &str, info: &AuthInfo) -> Result<Self, Error> {
        let attrs = info
            .kube_attributes
            .as_ref()
            .ok_or_else(|| Error::BadRequest("missing kubernetes attributes".into()))?;
        let service_account = attrs
            .service_account
            .as_ref()
            .ok_or_else(|| Error::BadRequest("missing kubernetes service account".into()))?;

        let owner = attrs
            .pod
            .as_ref()
            .map(|pod| pod.name.clone())
            .unwrap_or_else(|| service_account.name.clone());

        Ok(Self {
            name: name.to_string(),
            owner,
            owner_attributes: OwnerAttributes {
                namespace: attrs.namespace.clone(),
                issuer: info.provider.clone(),
                service_account_uid: service_account.uid.clone(),
                service_account_name: service_account.name.clone(),
                pod_uid: attrs.pod.as_ref().map(|pod| pod.uid.clone()),
            },
            auth_method: info.method,
        })
    }
}

/// Output of one generator run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generated {
    /// Key/value data returned to the caller
    pub data: BTreeMap<String, String>,
    /// Opaque state persisted as a GeneratorState
    pub state: BTreeMap<String, String>,
}

/// Generator failures; the message is returned to the caller
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// No generator handles this kind
    #[error("unsupported generator kind: {0}")]
    UnsupportedKind(String),

    /// The generator ran and failed
    #[error("{0}")]
    Failed(String),
}

/// Mints credentials
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run `generator` in `namespace` on behalf of `resource`
    async fn generate(
        &self,
        generator: &GeneratorRef,
        namespace: &str,
        resource: &Resource,
    ) -> Result<Generated, GeneratorError>;
}

/// Random alphanumeric passwords
#[derive(Debug, Clone)]
pub struct PasswordGenerator {
    length: usize,
}

impl PasswordGenerator {
    /// Create a generator producing passwords of `length` characters
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl Default for PasswordGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PASSWORD_LENGTH)
    }
}

#[async_trait]
impl Generator for PasswordGenerator {
    async fn generate(
        &self,
        generator: &GeneratorRef,
        _namespace: &str,
        resource: &Resource,
    ) -> Result<Generated, GeneratorError> {
        if self.length == 0 {
            return Err(GeneratorError::Failed("password length must be positive".into()));
        }

        let password: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect();

        debug!(generator = %generator, owner = %resource.owner, "Generated password");

        Ok(Generated {
            data: BTreeMap::from([("password".to_string(), password)]),
            state: BTreeMap::from([("length".to_string(), self.length.to_string())]),
        })
    }
}

/// Dispatches to a generator by kind
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<dyn Generator>>,
}

impl GeneratorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in generators
    pub fn with_defaults() -> Self {
        Self::new().register("Password", Arc::new(PasswordGenerator::default()))
    }

    /// Register a generator for `kind`, replacing any earlier one
    pub fn register(mut self, kind: impl Into<String>, generator: Arc<dyn Generator>) -> Self {
        self.generators.insert(kind.into(), generator);
        self
    }

    /// Registered kinds
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.generators.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

#[async_trait]
impl Generator for GeneratorRegistry {
    async fn generate(
        &self,
        generator: &GeneratorRef,
        namespace: &str,
        resource: &Resource,
    ) -> Result<Generated, GeneratorError> {
        let inner = self
            .generators
            .get(&generator.kind)
            .ok_or_else(|| GeneratorError::UnsupportedKind(generator.kind.clone()))?;
        inner.generate(generator, namespace, resource).await
    }
}
