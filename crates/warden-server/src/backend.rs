//! Backend wiring
//!
//! Assembles stores, the trust registry and collaborators for one of the
//! two store backends. The Kubernetes backend watches CRDs and runs the
//! lifecycle controller; the memory backend loads trust objects and Secrets
//! from a manifest file and sweeps records on an interval.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use tracing::{info, warn};

use warden_api::generators::GeneratorRegistry;
use warden_api::{
    AppState, AuthenticatorRegistry, InMemorySecretStore, KubeSecretStore, OidcAuthenticator,
    SecretStoreClient, SpiffeAuthenticator,
};
use warden_common::crd::WorkloadKind;
use warden_common::store::kubernetes::KubeStore;
use warden_common::store::memory::InMemoryStore;
use warden_common::store::{GeneratorStateStore, IdentityStore, StoreError, WorkloadLookup};
use warden_common::yaml::{load_trust_manifests, TrustManifests};
use warden_lifecycle::{Context, CredentialLedger, Reconciler};
use warden_trust::{load_manifests, TrustContext, TrustRegistry};

/// Settings shared by both backends
pub struct BackendSettings {
    /// Required `aud` values for OIDC tokens; empty skips the check
    pub oidc_audiences: Vec<String>,
    /// Register the SPIFFE authenticator
    pub spiffe_enabled: bool,
    /// Lifecycle requeue / sweep interval
    pub reconcile_interval: Duration,
    /// Store name to namespace mapping for the Kubernetes secret store
    pub secret_stores: BTreeMap<String, String>,
    /// Static trust manifest to load at startup
    pub trust_manifest: Option<String>,
}

/// Everything the server and background loops need
pub struct Backend {
    /// Handler state
    pub state: AppState,
    /// Trust controller context
    pub trust: Arc<TrustContext>,
    /// Lifecycle controller context
    pub lifecycle: Arc<Context>,
}

/// Read a trust manifest from disk
pub fn read_manifest(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read trust manifest {}", path.display()))
}

/// Workload lookup for deployments without a cluster
///
/// Every lookup fails, which the reconciler treats as "keep the credential".
pub struct NoClusterWorkloads;

#[async_trait]
impl WorkloadLookup for NoClusterWorkloads {
    async fn workload_uid(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        Err(StoreError::Backend(format!(
            "no cluster to look up {} {}/{}",
            kind, namespace, name
        )))
    }
}

fn authenticators(
    registry: &Arc<TrustRegistry>,
    settings: &BackendSettings,
) -> AuthenticatorRegistry {
    let mut authenticators = AuthenticatorRegistry::new().register(
        "oidc",
        Arc::new(OidcAuthenticator::new(
            registry.clone(),
            settings.oidc_audiences.clone(),
        )),
    );
    if settings.spiffe_enabled {
        authenticators = authenticators.register("spiffe", Arc::new(SpiffeAuthenticator::new()));
    } else {
        warn!("SPIFFE authentication disabled: no trust bundle configured");
    }
    authenticators
}

/// Shared assembly once the stores are chosen
fn assemble(
    registry: Arc<TrustRegistry>,
    trust: Arc<TrustContext>,
    identities: Arc<dyn IdentityStore>,
    states: Arc<dyn GeneratorStateStore>,
    workloads: Arc<dyn WorkloadLookup>,
    secrets: Arc<dyn SecretStoreClient>,
    settings: &BackendSettings,
) -> Backend {
    let ledger = Arc::new(CredentialLedger::new(identities));
    let reconciler = Arc::new(Reconciler::new(
        ledger.clone(),
        states.clone(),
        workloads,
        registry.clone(),
    ));

    let state = AppState {
        authenticators: Arc::new(authenticators(&registry, settings)),
        registry,
        ledger,
        states,
        generator: Arc::new(GeneratorRegistry::with_defaults()),
        secrets,
    };

    Backend {
        state,
        trust,
        lifecycle: Arc::new(Context::new(reconciler, settings.reconcile_interval)),
    }
}

fn parse_static_manifest(manifest: Option<&str>) -> anyhow::Result<Option<TrustManifests>> {
    manifest
        .map(|manifest| load_trust_manifests(manifest).context("invalid trust manifest"))
        .transpose()
}

async fn load_static_manifest(trust: &TrustContext, manifests: Option<&TrustManifests>) {
    let Some(manifests) = manifests else {
        return;
    };
    let failures = load_manifests(trust, manifests).await;
    if failures > 0 {
        warn!(failures, "Some trust objects failed to load");
    }
}

/// Serve manifest Secrets from every store mapped to their namespace
fn seed_secrets(
    store: &InMemorySecretStore,
    secrets: &[Secret],
    stores: &BTreeMap<String, String>,
) -> anyhow::Result<usize> {
    let mut seeded = 0;
    for secret in secrets {
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        let namespace = secret.metadata.namespace.as_deref().unwrap_or_default();
        let targets: Vec<&String> = stores
            .iter()
            .filter(|(_, ns)| ns.as_str() == namespace)
            .map(|(store, _)| store)
            .collect();
        if targets.is_empty() {
            warn!(secret = %name, namespace = %namespace, "No secret store maps to the Secret's namespace");
            continue;
        }
        for target in targets {
            store
                .insert_secret(target, secret.clone())
                .with_context(|| format!("invalid Secret {}/{}", namespace, name))?;
            seeded += 1;
        }
    }
    Ok(seeded)
}

/// Kubernetes-backed stores and secret store
pub async fn kubernetes(
    client: Client,
    registry: Arc<TrustRegistry>,
    settings: &BackendSettings,
) -> anyhow::Result<Backend> {
    let store = Arc::new(KubeStore::new(client.clone()));
    let trust = Arc::new(TrustContext::new(registry.clone(), client.clone()));
    let manifests = parse_static_manifest(settings.trust_manifest.as_deref())?;
    if manifests.as_ref().is_some_and(|m| !m.secrets.is_empty()) {
        warn!("Manifest Secrets are ignored; secrets are read from the cluster");
    }
    load_static_manifest(&trust, manifests.as_ref()).await;

    info!(stores = ?settings.secret_stores.keys().collect::<Vec<_>>(), "Using Kubernetes backend");
    let secrets = Arc::new(KubeSecretStore::new(client, settings.secret_stores.clone()));

    Ok(assemble(
        registry,
        trust,
        store.clone(),
        store.clone(),
        store,
        secrets,
        settings,
    ))
}

/// In-memory stores for local runs
pub async fn memory(
    registry: Arc<TrustRegistry>,
    settings: &BackendSettings,
) -> anyhow::Result<Backend> {
    let store = Arc::new(InMemoryStore::new());
    let trust = Arc::new(TrustContext::offline(registry.clone()));
    let manifests = parse_static_manifest(settings.trust_manifest.as_deref())?;
    load_static_manifest(&trust, manifests.as_ref()).await;

    let secrets = InMemorySecretStore::new();
    let seeded = match &manifests {
        Some(manifests) => seed_secrets(&secrets, &manifests.secrets, &settings.secret_stores)?,
        None => 0,
    };

    info!(seeded_secrets = seeded, "Using in-memory backend");
    Ok(assemble(
        registry,
        trust,
        store.clone(),
        store,
        Arc::new(NoClusterWorkloads),
        secrets.shared(),
        settings,
    ))
}
