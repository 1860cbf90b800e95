//! Trust watchers
//!
//! Keeps the [`TrustRegistry`] in sync with Authorization, KubernetesFederation
//! and SpiffeFederation objects. Each kind gets its own watch loop; applied
//! objects are loaded, deleted objects are unloaded, and a relist unloads
//! anything that disappeared while the watch was down.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use warden_common::crd::{
    Authorization, FederationKind, FederationRef, FederationStatus, KubernetesFederation,
    SecretKeyRef, SpiffeFederation,
};
use warden_common::yaml::TrustManifests;
use warden_common::FIELD_MANAGER;

use crate::error::{Result, TrustError};
use crate::provider::{KubernetesProvider, KubernetesProviderConfig, SpiffeProvider};
use crate::registry::TrustRegistry;

/// Shared state for the trust watchers
pub struct TrustContext {
    registry: Arc<TrustRegistry>,
    client: Option<Client>,
}

impl TrustContext {
    /// Context backed by the Kubernetes API
    pub fn new(registry: Arc<TrustRegistry>, client: Client) -> Self {
        Self {
            registry,
            client: Some(client),
        }
    }

    /// Context without an API server (static manifests only)
    pub fn offline(registry: Arc<TrustRegistry>) -> Self {
        Self {
            registry,
            client: None,
        }
    }

    /// Registry being maintained
    pub fn registry(&self) -> &Arc<TrustRegistry> {
        &self.registry
    }

    /// Kubernetes client, if running against a cluster
    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }
}

/// A trust object that can be loaded into and removed from the registry
#[async_trait]
pub trait TrustObject: Send + Sync {
    /// Apply this object to the registry
    async fn load(&self, ctx: &TrustContext) -> Result<()>;

    /// Remove this object from the registry
    fn unload(&self, ctx: &TrustContext);
}

#[async_trait]
impl TrustObject for Authorization {
    async fn load(&self, ctx: &TrustContext) -> Result<()> {
        let name = self.name_any();
        self.spec
            .validate()
            .map_err(|e| TrustError::configuration(format!("authorization {}: {}", name, e)))?;
        let Some(key) = self.spec.subject.trust_key() else {
            return Err(TrustError::configuration(format!(
                "authorization {}: subject has no trust domain",
                name
            )));
        };

        ctx.registry.add_policy(&key, &name, self.spec.clone());
        debug!(authorization = %name, issuer = %key, "Loaded authorization");
        Ok(())
    }

    fn unload(&self, ctx: &TrustContext) {
        let name = self.name_any();
        let Some(key) = self.spec.subject.trust_key() else {
            return;
        };
        if ctx.registry.remove_policy(&key, &name) {
            debug!(authorization = %name, issuer = %key, "Unloaded authorization");
        }
    }
}

#[async_trait]
impl TrustObject for KubernetesFederation {
    async fn load(&self, ctx: &TrustContext) -> Result<()> {
        let name = self.name_any();
        let result = build_kubernetes_provider(self, ctx.client.as_ref()).await;

        let status = match &result {
            Ok(_) => FederationStatus::ready(self.metadata.generation),
            Err(e) => FederationStatus::failed(self.metadata.generation, e.to_string()),
        };
        if let Some(client) = &ctx.client {
            patch_status::<KubernetesFederation>(client, &name, &status).await;
        }

        let provider = result?;
        ctx.registry.add_provider(
            FederationRef::new(FederationKind::KubernetesFederation, &name),
            Arc::new(provider),
        );
        info!(federation = %name, issuer = %self.spec.issuer, "Loaded Kubernetes federation");
        Ok(())
    }

    fn unload(&self, ctx: &TrustContext) {
        let federation = FederationRef::new(FederationKind::KubernetesFederation, self.name_any());
        if ctx.registry.remove_provider(&federation) {
            info!(federation = %federation, "Unloaded federation");
        }
    }
}

#[async_trait]
impl TrustObject for SpiffeFederation {
    async fn load(&self, ctx: &TrustContext) -> Result<()> {
        let name = self.name_any();
        if self.spec.trust_domain.is_empty() {
            let err = TrustError::configuration("trustDomain must not be empty");
            if let Some(client) = &ctx.client {
                let status = FederationStatus::failed(self.metadata.generation, err.to_string());
                patch_status::<SpiffeFederation>(client, &name, &status).await;
            }
            return Err(err);
        }

        ctx.registry.add_provider(
            FederationRef::new(FederationKind::SpiffeFederation, &name),
            Arc::new(SpiffeProvider::new(&self.spec.trust_domain)),
        );
        if let Some(client) = &ctx.client {
            let status = FederationStatus::ready(self.metadata.generation);
            patch_status::<SpiffeFederation>(client, &name, &status).await;
        }
        info!(federation = %name, trust_domain = %self.spec.trust_domain, "Loaded SPIFFE federation");
        Ok(())
    }

    fn unload(&self, ctx: &TrustContext) {
        let federation = FederationRef::new(FederationKind::SpiffeFederation, self.name_any());
        if ctx.registry.remove_provider(&federation) {
            info!(federation = %federation, "Unloaded federation");
        }
    }
}

async fn build_kubernetes_provider(
    federation: &KubernetesFederation,
    client: Option<&Client>,
) -> Result<KubernetesProvider> {
    let api_token = match (&federation.spec.token_secret_ref, client) {
        (Some(secret_ref), Some(client)) => Some(read_secret_key(client, secret_ref).await?),
        (Some(secret_ref), None) => {
            return Err(TrustError::configuration(format!(
                "tokenSecretRef {}/{} requires a cluster connection",
                secret_ref.namespace, secret_ref.name
            )))
        }
        (None, _) => None,
    };

    KubernetesProvider::new(KubernetesProviderConfig::from_spec(
        &federation.spec,
        api_token,
    ))
}

/// Read one key of a Secret as UTF-8 text
async fn read_secret_key(client: &Client, secret_ref: &SecretKeyRef) -> Result<String> {
    let api: Api<Secret> = Api::namespaced(client.clone(), &secret_ref.namespace);
    let secret = api.get(&secret_ref.name).await?;

    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(&secret_ref.key))
        .ok_or_else(|| {
            TrustError::configuration(format!(
                "secret {}/{} has no key {}",
                secret_ref.namespace, secret_ref.name, secret_ref.key
            ))
        })?;

    String::from_utf8(bytes.0.clone()).map(|s| s.trim().to_string()).map_err(|_| {
        TrustError::configuration(format!(
            "secret {}/{} key {} is not valid UTF-8",
            secret_ref.namespace, secret_ref.name, secret_ref.key
        ))
    })
}

/// Merge-patch the status subresource of a cluster-scoped federation
async fn patch_status<K>(client: &Client, name: &str, status: &FederationStatus)
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
{
    let api: Api<K> = Api::all(client.clone());
    let patch = json!({ "status": status });
    if let Err(e) = api
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
    {
        warn!(federation = %name, error = %e, "Failed to update federation status");
    }
}

/// Watch one kind and mirror it into the registry until the stream ends
pub async fn watch_trust_objects<K>(ctx: Arc<TrustContext>, api: Api<K>)
where
    K: TrustObject
        + Resource<DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    let kind = K::kind(&()).to_string();
    info!(kind = %kind, "Starting trust watcher");

    let mut cache: HashMap<String, K> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut stream = watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    loop {
        let event = match stream.try_next().await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Trust watch error");
                continue;
            }
        };

        match event {
            Event::Apply(obj) | Event::InitApply(obj) => {
                let name = obj.name_any();
                seen.insert(name.clone());
                if let Err(e) = obj.load(&ctx).await {
                    warn!(kind = %kind, name = %name, error = %e, "Failed to load trust object");
                    if let Some(previous) = cache.remove(&name) {
                        previous.unload(&ctx);
                    }
                    continue;
                }
                cache.insert(name, obj);
            }
            Event::Delete(obj) => {
                let name = obj.name_any();
                cache.remove(&name);
                obj.unload(&ctx);
            }
            Event::Init => {
                seen.clear();
            }
            Event::InitDone => {
                let stale: Vec<String> = cache
                    .keys()
                    .filter(|name| !seen.contains(*name))
                    .cloned()
                    .collect();
                for name in stale {
                    if let Some(obj) = cache.remove(&name) {
                        debug!(kind = %kind, name = %name, "Removing object missing after relist");
                        obj.unload(&ctx);
                    }
                }
            }
        }
    }

    info!(kind = %kind, "Trust watcher stopped");
}

/// Run the watchers for all trust kinds
pub async fn run_trust_watchers(ctx: Arc<TrustContext>) -> Result<()> {
    let Some(client) = ctx.client.clone() else {
        return Err(TrustError::configuration(
            "trust watchers need a Kubernetes client",
        ));
    };

    tokio::join!(
        watch_trust_objects(ctx.clone(), Api::<Authorization>::all(client.clone())),
        watch_trust_objects(ctx.clone(), Api::<KubernetesFederation>::all(client.clone())),
        watch_trust_objects(ctx.clone(), Api::<SpiffeFederation>::all(client)),
    );
    Ok(())
}

/// Load statically declared trust objects
///
/// Federations are loaded before policies. Returns the number of objects
/// that failed to load; each failure is logged.
pub async fn load_manifests(ctx: &TrustContext, manifests: &TrustManifests) -> usize {
    let mut failures = 0;

    for federation in &manifests.kubernetes_federations {
        failures += usize::from(log_failure(federation, federation.load(ctx).await));
    }
    for federation in &manifests.spiffe_federations {
        failures += usize::from(log_failure(federation, federation.load(ctx).await));
    }
    for authorization in &manifests.authorizations {
        failures += usize::from(log_failure(authorization, authorization.load(ctx).await));
    }

    info!(
        policies = manifests.authorizations.len(),
        providers = ctx.registry.provider_count(),
        failures,
        "Loaded trust manifests"
    );
    failures
}

fn log_failure<K: Resource<DynamicType = ()>>(obj: &K, result: Result<()>) -> bool {
    match result {
        Ok(()) => false,
        Err(e) => {
            warn!(kind = %K::kind(&()), name = %obj.name_any(), error = %e, "Failed to load trust object");
            true
        }
    }
}
