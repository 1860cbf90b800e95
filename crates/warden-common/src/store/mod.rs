//! Resource store abstraction
//!
//! Handlers and the lifecycle reconciler never talk to the Kubernetes API
//! directly. They go through these traits so the same logic runs against
//! the cluster ([`kubernetes`]) or an in-process map ([`memory`]).

pub mod kubernetes;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::crd::{
    AuthorizedIdentity, AuthorizedIdentityStatus, GeneratorState, WorkloadKind,
};

/// Errors returned by resource stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Object kind
        kind: String,
        /// Object name
        name: String,
    },

    /// The write lost a race with another writer
    #[error("conflict writing {kind} {name}")]
    Conflict {
        /// Object kind
        kind: String,
        /// Object name
        name: String,
    },

    /// Any other backend failure
    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// True if the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True if the write should be retried after re-reading
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Persistence of generator states
#[async_trait]
pub trait GeneratorStateStore: Send + Sync {
    /// Create a generator state; `metadata.generateName` is honoured
    async fn create(&self, state: GeneratorState) -> Result<GeneratorState, StoreError>;

    /// Fetch a generator state by namespace and name
    async fn get(&self, namespace: &str, name: &str) -> Result<GeneratorState, StoreError>;

    /// Delete every generator state in `namespace` carrying all of `labels`
    ///
    /// Returns the number of deleted objects.
    async fn delete_labeled(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<usize, StoreError>;
}

/// Persistence of authorized identity records
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Fetch a record by name
    async fn get(&self, name: &str) -> Result<AuthorizedIdentity, StoreError>;

    /// Create a record; fails with `Conflict` if it already exists
    async fn create(&self, identity: AuthorizedIdentity) -> Result<AuthorizedIdentity, StoreError>;

    /// Replace a record; fails with `Conflict` if its resourceVersion is stale
    async fn replace(&self, identity: AuthorizedIdentity)
        -> Result<AuthorizedIdentity, StoreError>;

    /// Delete a record; deleting a missing record is not an error
    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// List all records
    async fn list(&self) -> Result<Vec<AuthorizedIdentity>, StoreError>;

    /// Overwrite the status of a record
    async fn update_status(
        &self,
        name: &str,
        status: AuthorizedIdentityStatus,
    ) -> Result<(), StoreError>;
}

/// Lookup of live workloads
#[async_trait]
pub trait WorkloadLookup: Send + Sync {
    /// UID of the named pod or service account, or None if it does not exist
    async fn workload_uid(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_classify_themselves() {
        assert!(StoreError::not_found("GeneratorState", "gs-1").is_not_found());
        assert!(StoreError::conflict("AuthorizedIdentity", "identity-1").is_conflict());
        assert!(!StoreError::Backend("boom".into()).is_conflict());
        assert_eq!(
            StoreError::not_found("GeneratorState", "gs-1").to_string(),
            "GeneratorState gs-1 not found"
        );
    }
}
