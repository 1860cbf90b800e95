//! Credential lifecycle checks
//!
//! A credential is Live while the objects it was issued against still exist:
//! its GeneratorState, and the workload it is bound to with the same UID. A
//! subject whose identity no longer exists at its federation loses every
//! credential bound to a state or workload. A credential with neither
//! reference is always Live. Stale credentials are pruned; a record left
//! with nothing is deleted.
//!
//! Lookups that fail for any reason other than "not found" keep the
//! credential. Pruning only happens on positive evidence.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use warden_common::crd::{AuthorizedIdentityStatus, IssuedCredential};
use warden_common::store::{GeneratorStateStore, WorkloadLookup};
use warden_trust::TrustRegistry;

use crate::credentials::CredentialLedger;
use crate::error::Result;

/// Liveness of one credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    /// Backing objects still exist
    Live,
    /// A backing object is gone or was replaced
    Stale,
}

/// What a reconcile pass did to a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The record no longer exists
    Missing,
    /// The record was kept with `live` credentials after pruning `pruned`
    Kept {
        /// Remaining credentials
        live: usize,
        /// Removed credentials
        pruned: usize,
    },
    /// Every credential was stale and the record was deleted
    Deleted {
        /// Removed credentials
        pruned: usize,
    },
}

/// Checks and prunes AuthorizedIdentity records
pub struct Reconciler {
    ledger: Arc<CredentialLedger>,
    states: Arc<dyn GeneratorStateStore>,
    workloads: Arc<dyn WorkloadLookup>,
    registry: Arc<TrustRegistry>,
}

impl Reconciler {
    /// Create a reconciler
    pub fn new(
        ledger: Arc<CredentialLedger>,
        states: Arc<dyn GeneratorStateStore>,
        workloads: Arc<dyn WorkloadLookup>,
        registry: Arc<TrustRegistry>,
    ) -> Self {
        Self {
            ledger,
            states,
            workloads,
            registry,
        }
    }

    /// Ledger shared with the request handlers
    pub fn ledger(&self) -> &Arc<CredentialLedger> {
        &self.ledger
    }

    /// Classify one credential
    pub async fn check_credential(&self, credential: &IssuedCredential) -> CredentialStatus {
        if let Some(state_ref) = &credential.state_ref {
            match self.states.get(&state_ref.namespace, &state_ref.name).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    debug!(
                        namespace = %state_ref.namespace,
                        name = %state_ref.name,
                        "Generator state is gone"
                    );
                    return CredentialStatus::Stale;
                }
                Err(e) => {
                    warn!(
                        namespace = %state_ref.namespace,
                        name = %state_ref.name,
                        error = %e,
                        "Generator state lookup failed, keeping credential"
                    );
                }
            }
        }

        if let Some(binding) = &credential.workload_binding {
            match self
                .workloads
                .workload_uid(binding.kind, &binding.namespace, &binding.name)
                .await
            {
                Ok(Some(uid)) if uid == binding.uid => {}
                Ok(Some(uid)) => {
                    debug!(
                        kind = %binding.kind,
                        namespace = %binding.namespace,
                        name = %binding.name,
                        expected = %binding.uid,
                        found = %uid,
                        "Workload was replaced"
                    );
                    return CredentialStatus::Stale;
                }
                Ok(None) => {
                    debug!(
                        kind = %binding.kind,
                        namespace = %binding.namespace,
                        name = %binding.name,
                        "Workload is gone"
                    );
                    return CredentialStatus::Stale;
                }
                Err(e) => {
                    warn!(
                        kind = %binding.kind,
                        namespace = %binding.namespace,
                        name = %binding.name,
                        error = %e,
                        "Workload lookup failed, keeping credential"
                    );
                }
            }
        }

        CredentialStatus::Live
    }

    /// Whether the subject still exists at the federations that trust it
    ///
    /// False only if at least one provider answered and every answer was
    /// false. Errors and a lack of providers count as existing.
    pub async fn identity_exists(&self, provider: &str, subject: &str) -> bool {
        let policies = self.registry.get_policies(provider);
        let mut answered = false;

        for policy in policies.iter().filter(|p| p.spec.subject.id() == Some(subject)) {
            let Some(federation) = self.registry.get_provider(&policy.spec.federation_ref) else {
                continue;
            };
            match federation.check_identity_exists(subject).await {
                Ok(true) => return true,
                Ok(false) => answered = true,
                Err(e) => {
                    warn!(subject = %subject, error = %e, "Identity check failed, assuming it exists");
                    return true;
                }
            }
        }

        !answered
    }

    /// Reconcile one record by name
    pub async fn reconcile_identity(&self, name: &str) -> Result<ReconcileOutcome> {
        let store = self.ledger.store();
        let guard = self.ledger.lock(name).await;

        let mut identity = match store.get(name).await {
            Ok(identity) => identity,
            Err(e) if e.is_not_found() => {
                drop(guard);
                self.ledger.forget(name);
                return Ok(ReconcileOutcome::Missing);
            }
            Err(e) => return Err(e.into()),
        };

        let total = identity.spec.credentials.len();
        let identity_exists = self
            .identity_exists(&identity.spec.provider, &identity.spec.subject)
            .await;
        if !identity_exists {
            info!(identity = %name, subject = %identity.spec.subject, "Identity no longer exists");
        }

        let mut live: Vec<IssuedCredential> = Vec::with_capacity(total);
        for credential in &identity.spec.credentials {
            let status = if !is_referenced(credential) {
                CredentialStatus::Live
            } else if !identity_exists {
                CredentialStatus::Stale
            } else {
                self.check_credential(credential).await
            };
            if status == CredentialStatus::Live {
                live.push(credential.clone());
            }
        }
        let pruned = total - live.len();

        if live.is_empty() {
            store.delete(name).await?;
            drop(guard);
            self.ledger.forget(name);
            info!(identity = %name, pruned, "Deleted identity with no live credentials");
            return Ok(ReconcileOutcome::Deleted { pruned });
        }

        if pruned > 0 {
            identity.spec.credentials = live;
            identity = store.replace(identity).await?;
            info!(identity = %name, pruned, "Pruned stale credentials");
        }

        let live_count = identity.spec.credentials.len();
        let recorded = identity.status.as_ref().map(|s| s.live_credentials);
        // Status writes retrigger the watch, so only write on change
        if recorded != Some(live_count as u32) {
            let status = AuthorizedIdentityStatus {
                last_reconciled: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
                live_credentials: live_count as u32,
            };
            if let Err(e) = store.update_status(name, status).await {
                warn!(identity = %name, error = %e, "Failed to update identity status");
            }
        }

        Ok(ReconcileOutcome::Kept {
            live: live_count,
            pruned,
        })
    }
}

/// Whether a credential points at a state or workload that can go away
fn is_referenced(credential: &IssuedCredential) -> bool {
    credential.state_ref.is_some() || credential.workload_binding.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_common::crd::{
        identity_name, AuthMethod, AuthorizationSpec, FederationKind, FederationRef, SourceRef,
        StateRef, Subject, WorkloadBinding, WorkloadKind,
    };
    use warden_common::store::memory::InMemoryStore;
    use warden_common::store::{IdentityStore, StoreError};
    use warden_trust::{FederationProvider, JwkSet, JwksRequest, TrustError};

    const ISSUER: &str = "https://issuer";
    const SUBJECT: &str = "system:serviceaccount:payments:api";

    /// Provider with a fixed identity-existence answer; `None` fails the check
    struct FixedAnswer(Option<bool>);

    #[async_trait::async_trait]
    impl FederationProvider for FixedAnswer {
        async fn get_jwks(&self, _request: &JwksRequest) -> warden_trust::Result<JwkSet> {
            Ok(JwkSet::default())
        }

        async fn check_identity_exists(&self, subject: &str) -> warden_trust::Result<bool> {
            self.0
                .ok_or_else(|| TrustError::identity_check(subject, "HTTP 500"))
        }
    }

    struct FailingStates;

    #[async_trait::async_trait]
    impl GeneratorStateStore for FailingStates {
        async fn create(
            &self,
            _state: warden_common::crd::GeneratorState,
        ) -> std::result::Result<warden_common::crd::GeneratorState, StoreError> {
            Err(StoreError::Backend("unavailable".into()))
        }

        async fn get(
            &self,
            _namespace: &str,
            _name: &str,
        ) -> std::result::Result<warden_common::crd::GeneratorState, StoreError> {
            Err(StoreError::Backend("unavailable".into()))
        }

        async fn delete_labeled(
            &self,
            _namespace: &str,
            _labels: &std::collections::BTreeMap<String, String>,
        ) -> std::result::Result<usize, StoreError> {
            Err(StoreError::Backend("unavailable".into()))
        }
    }

    fn reconciler(store: Arc<InMemoryStore>, registry: Arc<TrustRegistry>) -> Reconciler {
        Reconciler::new(
            Arc::new(CredentialLedger::new(store.clone())),
            store.clone(),
            store,
            registry,
        )
    }

    fn source(name: &str) -> SourceRef {
        SourceRef {
            api_version: "generators.external-secrets.io/v1alpha1".into(),
            kind: "Password".into(),
            name: name.into(),
            namespace: Some("payments".into()),
        }
    }

    fn bound(name: &str, pod_uid: &str) -> IssuedCredential {
        IssuedCredential {
            source_ref: source(name),
            remote_ref: None,
            state_ref: None,
            workload_binding: Some(WorkloadBinding {
                kind: WorkloadKind::Pod,
                name: "api-0".into(),
                uid: pod_uid.into(),
                namespace: "payments".into(),
            }),
            issued_at: None,
        }
    }

    fn unbound(name: &str) -> IssuedCredential {
        IssuedCredential {
            source_ref: source(name),
            remote_ref: None,
            state_ref: None,
            workload_binding: None,
            issued_at: None,
        }
    }

    async fn seed(reconciler: &Reconciler, credentials: Vec<IssuedCredential>) -> String {
        for credential in credentials {
            reconciler
                .ledger()
                .record(SUBJECT, ISSUER, AuthMethod::Oidc, credential)
                .await
                .unwrap();
        }
        identity_name(SUBJECT)
    }

    fn trust(registry: &TrustRegistry, exists: Option<bool>) {
        registry.add_policy(
            ISSUER,
            "payments-api",
            AuthorizationSpec {
                federation_ref: FederationRef::new(FederationKind::KubernetesFederation, "prod"),
                subject: Subject::oidc(ISSUER, SUBJECT),
                allowed_cluster_secret_stores: vec![],
                allowed_generators: vec![],
                allowed_generator_states: vec![],
            },
        );
        registry.add_provider(
            FederationRef::new(FederationKind::KubernetesFederation, "prod"),
            Arc::new(FixedAnswer(exists)),
        );
    }

    // ==========================================================================
    // Story: Credentials without references are never pruned
    // ==========================================================================

    #[tokio::test]
    async fn unreferenced_credential_is_always_live() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = reconciler(store, Arc::new(TrustRegistry::new()));
        assert_eq!(reconciler.check_credential(&unbound("db")).await, CredentialStatus::Live);
    }

    // ==========================================================================
    // Story: Workload bindings compare UIDs
    // ==========================================================================

    #[tokio::test]
    async fn uid_mismatch_is_pruned_and_match_is_kept() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_workload(WorkloadKind::Pod, "payments", "api-0", "uid-2");
        let reconciler = reconciler(store.clone(), Arc::new(TrustRegistry::new()));

        let name = seed(&reconciler, vec![bound("old", "uid-1"), bound("new", "uid-2")]).await;
        let outcome = reconciler.reconcile_identity(&name).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Kept { live: 1, pruned: 1 });

        let identity = IdentityStore::get(store.as_ref(), &name).await.unwrap();
        assert_eq!(identity.spec.credentials, vec![bound("new", "uid-2")]);
        assert_eq!(identity.status.map(|s| s.live_credentials), Some(1));
    }

    #[tokio::test]
    async fn deleted_workload_empties_and_deletes_the_record() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = reconciler(store.clone(), Arc::new(TrustRegistry::new()));

        let name = seed(&reconciler, vec![bound("db", "uid-1")]).await;
        let outcome = reconciler.reconcile_identity(&name).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Deleted { pruned: 1 });
        assert!(IdentityStore::get(store.as_ref(), &name).await.unwrap_err().is_not_found());
    }

    // ==========================================================================
    // Story: Generator states are looked up directly
    // ==========================================================================

    #[tokio::test]
    async fn missing_generator_state_is_stale() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = reconciler(store, Arc::new(TrustRegistry::new()));

        let mut credential = unbound("db");
        credential.state_ref = Some(StateRef {
            name: "gs-abcde".into(),
            namespace: "payments".into(),
        });
        assert_eq!(reconciler.check_credential(&credential).await, CredentialStatus::Stale);
    }

    #[tokio::test]
    async fn lookup_errors_keep_the_credential() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = Reconciler::new(
            Arc::new(CredentialLedger::new(store.clone())),
            Arc::new(FailingStates),
            store,
            Arc::new(TrustRegistry::new()),
        );

        let mut credential = unbound("db");
        credential.state_ref = Some(StateRef {
            name: "gs-abcde".into(),
            namespace: "payments".into(),
        });
        assert_eq!(reconciler.check_credential(&credential).await, CredentialStatus::Live);
    }

    // ==========================================================================
    // Story: Identities that vanished at their federation lose bound credentials
    // ==========================================================================

    #[tokio::test]
    async fn vanished_identity_keeps_unreferenced_credentials() {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(TrustRegistry::new());
        trust(&registry, Some(false));
        let reconciler = reconciler(store.clone(), registry);

        let name = seed(&reconciler, vec![unbound("db"), unbound("cache")]).await;
        let outcome = reconciler.reconcile_identity(&name).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Kept { live: 2, pruned: 0 });

        let identity = IdentityStore::get(store.as_ref(), &name).await.unwrap();
        assert_eq!(identity.spec.credentials, vec![unbound("db"), unbound("cache")]);
    }

    #[tokio::test]
    async fn vanished_identity_prunes_only_bound_credentials() {
        let store = Arc::new(InMemoryStore::new());
        // The workload still exists, so only the vanished identity can prune it
        store.upsert_workload(WorkloadKind::Pod, "payments", "api-0", "uid-1");
        let registry = Arc::new(TrustRegistry::new());
        trust(&registry, Some(false));
        let reconciler = reconciler(store.clone(), registry);

        let name = seed(&reconciler, vec![bound("db", "uid-1"), unbound("cache")]).await;
        let outcome = reconciler.reconcile_identity(&name).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Kept { live: 1, pruned: 1 });

        let identity = IdentityStore::get(store.as_ref(), &name).await.unwrap();
        assert_eq!(identity.spec.credentials, vec![unbound("cache")]);
    }

    #[tokio::test]
    async fn vanished_identity_with_only_bound_credentials_is_deleted() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_workload(WorkloadKind::Pod, "payments", "api-0", "uid-1");
        let registry = Arc::new(TrustRegistry::new());
        trust(&registry, Some(false));
        let reconciler = reconciler(store.clone(), registry);

        let name = seed(&reconciler, vec![bound("db", "uid-1")]).await;
        let outcome = reconciler.reconcile_identity(&name).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Deleted { pruned: 1 });
    }

    // ==========================================================================
    // Story: Deleted records release their lock
    // ==========================================================================

    #[tokio::test]
    async fn deleting_a_record_drops_its_lock() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = reconciler(store.clone(), Arc::new(TrustRegistry::new()));

        let name = seed(&reconciler, vec![bound("db", "uid-1")]).await;
        assert_eq!(reconciler.ledger().lock_count(), 1);

        let outcome = reconciler.reconcile_identity(&name).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Deleted { pruned: 1 });
        assert_eq!(reconciler.ledger().lock_count(), 0);

        reconciler.reconcile_identity(&name).await.unwrap();
        assert_eq!(reconciler.ledger().lock_count(), 0);
    }

    #[tokio::test]
    async fn identity_check_errors_are_conservative() {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(TrustRegistry::new());
        trust(&registry, None);
        let reconciler = reconciler(store.clone(), registry);

        let name = seed(&reconciler, vec![unbound("db")]).await;
        let outcome = reconciler.reconcile_identity(&name).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Kept { live: 1, pruned: 0 });
    }

    #[tokio::test]
    async fn no_providers_means_the_identity_exists() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = reconciler(store, Arc::new(TrustRegistry::new()));
        assert!(reconciler.identity_exists(ISSUER, SUBJECT).await);
    }

    #[tokio::test]
    async fn missing_record_is_reported() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = reconciler(store, Arc::new(TrustRegistry::new()));
        let outcome = reconciler.reconcile_identity("identity-nope").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Missing);
    }
}
