//! Kubernetes API backed stores

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, ServiceAccount};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use super::{GeneratorStateStore, IdentityStore, StoreError, WorkloadLookup};
use crate::crd::{
    AuthorizedIdentity, AuthorizedIdentityStatus, GeneratorState, WorkloadKind,
};
use crate::{label_selector, FIELD_MANAGER};

const GENERATOR_STATE_KIND: &str = "GeneratorState";
const IDENTITY_KIND: &str = "AuthorizedIdentity";

/// Map API errors onto the store taxonomy
fn map_kube_error(kind: &str, name: &str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::not_found(kind, name),
        kube::Error::Api(ae) if ae.code == 409 => StoreError::conflict(kind, name),
        other => StoreError::Backend(other.to_string()),
    }
}

/// Stores backed by the cluster API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GeneratorStateStore for KubeStore {
    async fn create(&self, state: GeneratorState) -> Result<GeneratorState, StoreError> {
        let namespace = state
            .namespace()
            .ok_or_else(|| StoreError::Backend("GeneratorState has no namespace".into()))?;
        let name_hint = state
            .metadata
            .name
            .clone()
            .or_else(|| state.metadata.generate_name.clone())
            .unwrap_or_default();

        let api: Api<GeneratorState> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), &state)
            .await
            .map_err(|e| map_kube_error(GENERATOR_STATE_KIND, &name_hint, e))
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<GeneratorState, StoreError> {
        let api: Api<GeneratorState> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| map_kube_error(GENERATOR_STATE_KIND, name, e))
    }

    async fn delete_labeled(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<usize, StoreError> {
        let api: Api<GeneratorState> = Api::namespaced(self.client.clone(), namespace);
        let selector = label_selector(labels);
        let states = api
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| map_kube_error(GENERATOR_STATE_KIND, &selector, e))?;

        let mut deleted = 0;
        for state in states.items {
            let name = state.name_any();
            match api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => deleted += 1,
                // Someone else got there first
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => return Err(map_kube_error(GENERATOR_STATE_KIND, &name, e)),
            }
        }

        debug!(namespace = %namespace, selector = %selector, deleted, "Deleted generator states");
        Ok(deleted)
    }
}

#[async_trait]
impl IdentityStore for KubeStore {
    async fn get(&self, name: &str) -> Result<AuthorizedIdentity, StoreError> {
        let api: Api<AuthorizedIdentity> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| map_kube_error(IDENTITY_KIND, name, e))
    }

    async fn create(&self, identity: AuthorizedIdentity) -> Result<AuthorizedIdentity, StoreError> {
        let api: Api<AuthorizedIdentity> = Api::all(self.client.clone());
        let name = identity.name_any();
        api.create(&PostParams::default(), &identity)
            .await
            .map_err(|e| map_kube_error(IDENTITY_KIND, &name, e))
    }

    async fn replace(
        &self,
        identity: AuthorizedIdentity,
    ) -> Result<AuthorizedIdentity, StoreError> {
        let api: Api<AuthorizedIdentity> = Api::all(self.client.clone());
        let name = identity.name_any();
        api.replace(&name, &PostParams::default(), &identity)
            .await
            .map_err(|e| map_kube_error(IDENTITY_KIND, &name, e))
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let api: Api<AuthorizedIdentity> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(map_kube_error(IDENTITY_KIND, name, e)),
        }
    }

    async fn list(&self) -> Result<Vec<AuthorizedIdentity>, StoreError> {
        let api: Api<AuthorizedIdentity> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| map_kube_error(IDENTITY_KIND, "*", e))
    }

    async fn update_status(
        &self,
        name: &str,
        status: AuthorizedIdentityStatus,
    ) -> Result<(), StoreError> {
        let api: Api<AuthorizedIdentity> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(IDENTITY_KIND, name, e))
    }
}

#[async_trait]
impl WorkloadLookup for KubeStore {
    async fn workload_uid(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        let kind_name = kind.to_string();
        let uid = match kind {
            WorkloadKind::Pod => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                api.get_opt(name)
                    .await
                    .map_err(|e| map_kube_error(&kind_name, name, e))?
                    .and_then(|pod| pod.metadata.uid)
            }
            WorkloadKind::ServiceAccount => {
                let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
                api.get_opt(name)
                    .await
                    .map_err(|e| map_kube_error(&kind_name, name, e))?
                    .and_then(|sa| sa.metadata.uid)
            }
        };
        Ok(uid)
    }
}
