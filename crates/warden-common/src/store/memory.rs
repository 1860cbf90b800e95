//! In-memory stores for local runs and tests
//!
//! Mirrors the API server semantics the rest of Warden relies on:
//! `generateName` suffixes, resourceVersion checks on replace, and
//! conflicts on duplicate creates.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kube::ResourceExt;
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::{GeneratorStateStore, IdentityStore, StoreError, WorkloadLookup};
use crate::crd::{
    AuthorizedIdentity, AuthorizedIdentityStatus, GeneratorState, WorkloadKind,
};

const GENERATED_SUFFIX_LEN: usize = 5;

type WorkloadKey = (WorkloadKind, String, String);

/// Process-local implementation of every store trait
#[derive(Default)]
pub struct InMemoryStore {
    generator_states: RwLock<BTreeMap<(String, String), GeneratorState>>,
    identities: DashMap<String, AuthorizedIdentity>,
    workloads: DashMap<WorkloadKey, String>,
    revision: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live workload with the given UID
    pub fn upsert_workload(
        &self,
        kind: WorkloadKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
    ) {
        self.workloads
            .insert((kind, namespace.into(), name.into()), uid.into());
    }

    /// Forget a workload, as if it had been deleted
    pub fn remove_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) {
        self.workloads
            .remove(&(kind, namespace.to_string(), name.to_string()));
    }

    /// Generator states currently stored in a namespace
    pub fn generator_states_in(&self, namespace: &str) -> Vec<GeneratorState> {
        self.generator_states
            .read()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, state)| state.clone())
            .collect()
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

fn generated_name(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SUFFIX_LEN)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{}{}", prefix, suffix)
}

fn has_labels(state: &GeneratorState, labels: &BTreeMap<String, String>) -> bool {
    let own = state.labels();
    labels.iter().all(|(k, v)| own.get(k) == Some(v))
}

#[async_trait]
impl GeneratorStateStore for InMemoryStore {
    async fn create(&self, mut state: GeneratorState) -> Result<GeneratorState, StoreError> {
        let namespace = state
            .namespace()
            .ok_or_else(|| StoreError::Backend("GeneratorState has no namespace".into()))?;
        let name = match (&state.metadata.name, &state.metadata.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => generated_name(prefix),
            (None, None) => {
                return Err(StoreError::Backend(
                    "GeneratorState needs a name or generateName".into(),
                ))
            }
        };

        state.metadata.name = Some(name.clone());
        state.metadata.resource_version = Some(self.next_revision());

        let mut states = self.generator_states.write();
        let key = (namespace, name.clone());
        if states.contains_key(&key) {
            return Err(StoreError::conflict("GeneratorState", name));
        }
        states.insert(key, state.clone());
        Ok(state)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<GeneratorState, StoreError> {
        self.generator_states
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found("GeneratorState", name))
    }

    async fn delete_labeled(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<usize, StoreError> {
        let mut states = self.generator_states.write();
        let before = states.len();
        states.retain(|(ns, _), state| !(ns == namespace && has_labels(state, labels)));
        Ok(before - states.len())
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn get(&self, name: &str) -> Result<AuthorizedIdentity, StoreError> {
        self.identities
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::not_found("AuthorizedIdentity", name))
    }

    async fn create(
        &self,
        mut identity: AuthorizedIdentity,
    ) -> Result<AuthorizedIdentity, StoreError> {
        let name = identity.name_any();
        match self.identities.entry(name.clone()) {
            Entry::Occupied(_) => Err(StoreError::conflict("AuthorizedIdentity", name)),
            Entry::Vacant(slot) => {
                identity.metadata.resource_version = Some(self.next_revision());
                slot.insert(identity.clone());
                Ok(identity)
            }
        }
    }

    async fn replace(
        &self,
        mut identity: AuthorizedIdentity,
    ) -> Result<AuthorizedIdentity, StoreError> {
        let name = identity.name_any();
        match self.identities.entry(name.clone()) {
            Entry::Vacant(_) => Err(StoreError::not_found("AuthorizedIdentity", name)),
            Entry::Occupied(mut slot) => {
                if slot.get().metadata.resource_version != identity.metadata.resource_version {
                    return Err(StoreError::conflict("AuthorizedIdentity", name));
                }
                identity.metadata.resource_version = Some(self.next_revision());
                slot.insert(identity.clone());
                Ok(identity)
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.identities.remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<AuthorizedIdentity>, StoreError> {
        Ok(self
            .identities
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn update_status(
        &self,
        name: &str,
        status: AuthorizedIdentityStatus,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .identities
            .get_mut(name)
            .ok_or_else(|| StoreError::not_found("AuthorizedIdentity", name))?;
        entry.status = Some(status);
        entry.metadata.resource_version = Some(self.next_revision());
        Ok(())
    }
}

#[async_trait]
impl WorkloadLookup for InMemoryStore {
    async fn workload_uid(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .workloads
            .get(&(kind, namespace.to_string(), name.to_string()))
            .map(|uid| uid.clone()))
    }
}
