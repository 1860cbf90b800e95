//! Secret store collaborators
//!
//! A cluster secret store is addressed by name. The Kubernetes client maps
//! each store name to a namespace and serves Secrets from it:
//!
//! - `name` returns every key of the Secret as a flat JSON object
//! - `name/property` returns the raw value of one key

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tracing::debug;

/// Secret store failures; the message is returned to the caller
#[derive(Debug, Error)]
pub enum SecretStoreError {
    /// The store name is not configured
    #[error("unknown secret store: {0}")]
    UnknownStore(String),

    /// The key does not exist in the store
    #[error("secret {key} not found in store {store}")]
    NotFound {
        /// Store name
        store: String,
        /// Requested key
        key: String,
    },

    /// The backend failed
    #[error("secret store error: {0}")]
    Backend(String),
}

/// Reads secrets from named stores
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStoreClient: Send + Sync {
    /// Read `key` from `store`
    async fn get_secret(&self, store: &str, key: &str) -> Result<Vec<u8>, SecretStoreError>;
}

/// Serves Kubernetes Secrets, one namespace per store
pub struct KubeSecretStore {
    client: Client,
    namespaces: BTreeMap<String, String>,
}

impl KubeSecretStore {
    /// Create a client; `namespaces` maps store names to namespaces
    pub fn new(client: Client, namespaces: BTreeMap<String, String>) -> Self {
        Self { client, namespaces }
    }
}

/// Split `name/property`; a bare name selects the whole Secret
fn split_key(key: &str) -> (&str, Option<&str>) {
    match key.split_once('/') {
        Some((name, property)) if !property.is_empty() => (name, Some(property)),
        Some((name, _)) => (name, None),
        None => (key, None),
    }
}

/// Merge `data` and `stringData` into raw bytes
fn secret_data(secret: Secret) -> BTreeMap<String, Vec<u8>> {
    let mut result: BTreeMap<String, Vec<u8>> = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.0))
        .collect();
    if let Some(string_data) = secret.string_data {
        result.extend(string_data.into_iter().map(|(k, v)| (k, v.into_bytes())));
    }
    result
}

fn render_all(data: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, SecretStoreError> {
    let flat: BTreeMap<&str, String> = data
        .iter()
        .map(|(key, value)| {
            let decoded = String::from_utf8(value.clone()).unwrap_or_else(|_| hex::encode(value));
            (key.as_str(), decoded)
        })
        .collect();
    serde_json::to_vec(&flat).map_err(|e| SecretStoreError::Backend(e.to_string()))
}

#[async_trait]
impl SecretStoreClient for KubeSecretStore {
    async fn get_secret(&self, store: &str, key: &str) -> Result<Vec<u8>, SecretStoreError> {
        let namespace = self
            .namespaces
            .get(store)
            .ok_or_else(|| SecretStoreError::UnknownStore(store.to_string()))?;
        let (name, property) = split_key(key);

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get_opt(name)
            .await
            .map_err(|e| SecretStoreError::Backend(e.to_string()))?
            .ok_or_else(|| SecretStoreError::NotFound {
                store: store.to_string(),
                key: key.to_string(),
            })?;

        debug!(store = %store, namespace = %namespace, secret = %name, "Read secret");

        let mut data = secret_data(secret);
        match property {
            Some(property) => data.remove(property).ok_or_else(|| SecretStoreError::NotFound {
                store: store.to_string(),
                key: key.to_string(),
            }),
            None => render_all(&data),
        }
    }
}

/// Secret store held in memory, for local runs and tests
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: DashMap<(String, String), Vec<u8>>,
}

impl InMemorySecretStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` in `store`
    pub fn insert(&self, store: &str, key: &str, value: impl Into<Vec<u8>>) {
        self.secrets
            .insert((store.to_string(), key.to_string()), value.into());
    }

    /// Serve `secret` from `store` the way [`KubeSecretStore`] would
    ///
    /// The bare name maps to every key as flat JSON and `name/property` to
    /// one raw value. Returns the number of keys inserted.
    pub fn insert_secret(&self, store: &str, secret: Secret) -> Result<usize, SecretStoreError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        if name.is_empty() {
            return Err(SecretStoreError::Backend("secret has no name".into()));
        }
        let data = secret_data(secret);
        self.insert(store, &name, render_all(&data)?);
        for (property, value) in &data {
            self.insert(store, &format!("{}/{}", name, property), value.clone());
        }
        Ok(data.len() + 1)
    }

    /// Wrap in an `Arc` for sharing with the router
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl SecretStoreClient for InMemorySecretStore {
    async fn get_secret(&self, store: &str, key: &str) -> Result<Vec<u8>, SecretStoreError> {
        self.secrets
            .get(&(store.to_string(), key.to_string()))
            .map(|value| value.clone())
            .ok_or_else(|| SecretStoreError::NotFound {
                store: store.to_string(),
                key: key.to_string(),
            })
    }
}
