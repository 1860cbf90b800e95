//! Credential ledger
//!
//! Records which credentials were issued to which subject. Each subject has
//! one AuthorizedIdentity record; a credential occupies a slot keyed by its
//! source and workload binding, so re-issuing the same credential replaces
//! the slot instead of growing the list.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use warden_common::crd::{
    identity_name, AuthMethod, AuthorizedIdentity, AuthorizedIdentitySpec, IssuedCredential,
};
use warden_common::store::IdentityStore;

use crate::error::{ReconcileError, Result};

/// Attempts made before an optimistic write gives up
pub const MAX_WRITE_ATTEMPTS: usize = 5;

/// Put `credential` into its slot
///
/// Returns true if an existing entry was replaced, false if it was appended.
pub fn upsert_credential(credentials: &mut Vec<IssuedCredential>, credential: IssuedCredential) -> bool {
    match credentials.iter_mut().find(|c| c.same_slot(&credential)) {
        Some(existing) => {
            *existing = credential;
            true
        }
        None => {
            credentials.push(credential);
            false
        }
    }
}

/// Serialized read-modify-write access to AuthorizedIdentity records
pub struct CredentialLedger {
    store: Arc<dyn IdentityStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CredentialLedger {
    /// Create a ledger over an identity store
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// Take the in-process lock for one record
    ///
    /// Writers in other replicas are handled by resourceVersion conflicts.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock of a deleted record unless someone holds or awaits it
    pub fn forget(&self, name: &str) {
        self.locks
            .remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Record a credential issued to `subject`
    ///
    /// Creates the subject's record on first use. Retries on conflicts and
    /// on the record vanishing between read and write.
    pub async fn record(
        &self,
        subject: &str,
        provider: &str,
        method: AuthMethod,
        credential: IssuedCredential,
    ) -> Result<AuthorizedIdentity> {
        let name = identity_name(subject);
        let _guard = self.lock(&name).await;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let result = match self.store.get(&name).await {
                Ok(mut identity) => {
                    let replaced = upsert_credential(&mut identity.spec.credentials, credential.clone());
                    debug!(identity = %name, replaced, attempt, "Updating credential record");
                    self.store.replace(identity).await
                }
                Err(e) if e.is_not_found() => {
                    debug!(identity = %name, attempt, "Creating credential record");
                    self.store
                        .create(new_identity(&name, subject, provider, method, credential.clone()))
                        .await
                }
                Err(e) => return Err(e.into()),
            };

            match result {
                Ok(identity) => return Ok(identity),
                Err(e) if e.is_conflict() || e.is_not_found() => {
                    debug!(identity = %name, attempt, error = %e, "Credential write raced, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ReconcileError::retries_exhausted(name, MAX_WRITE_ATTEMPTS))
    }
}

fn new_identity(
    name: &str,
    subject: &str,
    provider: &str,
    method: AuthMethod,
    credential: IssuedCredential,
) -> AuthorizedIdentity {
    AuthorizedIdentity::new(
        name,
        AuthorizedIdentitySpec {
            subject: subject.to_string(),
            provider: provider.to_string(),
            method,
            credentials: vec![credential],
        },
    )
}
