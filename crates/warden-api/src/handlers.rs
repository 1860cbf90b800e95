//! Request handlers
//!
//! Every handler runs after authentication. It looks up the policies that
//! trust the caller's issuer, matches one against the requested resource,
//! and only then calls the collaborator. A request no policy covers is
//! reported as 404 without touching any collaborator.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::{SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::Deserialize;
use tracing::{debug, info};

use warden_common::crd::{
    GeneratorRef, GeneratorState, GeneratorStateSpec, IssuedCredential, SourceRef, StateRef,
    WorkloadBinding, WorkloadKind,
};
use warden_common::{generator_state_labels, AUTH_METHOD_LABEL, OWNER_LABEL};
use warden_trust::{match_policy, ResourceRequest};

use crate::auth::AuthInfo;
use crate::error::{Error, Result};
use crate::generators::Resource;
use crate::server::AppState;

/// API version recorded as the source of generated credentials
pub const GENERATOR_API_VERSION: &str = "generators.external-secrets.io/v1alpha1";

/// Prefix for generated GeneratorState names
const GENERATOR_STATE_PREFIX: &str = "gs-";

/// Body of `POST /generators/{namespace}/revoke`
#[derive(Debug, Clone, Deserialize)]
pub struct RevokeRequest {
    /// Owner label value of the states to revoke
    #[serde(default)]
    pub owner: String,
    /// Target namespace; the path namespace is used when empty
    #[serde(default)]
    pub namespace: String,
}

/// Find the policy granting `info` access to `request`
fn authorize(state: &AppState, info: &AuthInfo, request: &ResourceRequest) -> Result<String> {
    let policies = state.registry.get_policies(&info.provider);
    match match_policy(&policies, &info.subject, request) {
        Some(policy) => {
            debug!(
                policy = %policy.name,
                subject = %info.subject,
                resource = %request,
                "Request authorized"
            );
            Ok(policy.name.clone())
        }
        None => {
            debug!(
                subject = %info.subject,
                provider = %info.provider,
                resource = %request,
                "No policy matched"
            );
            Err(Error::NotFound(format!(
                "{} is not allowed for {}",
                request, info.subject
            )))
        }
    }
}

/// Decode secret bytes, falling back to hex for non-UTF-8 values
fn secret_string(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| hex::encode(e.as_bytes()))
}

/// `POST /secretstore/{secretStoreName}/secrets/{secretName}`
pub async fn read_secret(
    State(state): State<AppState>,
    Extension(info): Extension<AuthInfo>,
    Path((store, key)): Path<(String, String)>,
) -> Result<Json<String>> {
    authorize(&state, &info, &ResourceRequest::SecretStore { name: store.clone() })?;

    let value = state
        .secrets
        .get_secret(&store, &key)
        .await
        .map_err(|e| Error::BadRequest(e.to_string()))?;

    info!(store = %store, key = %key, subject = %info.subject, "Secret read");
    Ok(Json(secret_string(value)))
}

/// Owner reference to the requesting workload
fn owner_reference(resource: &Resource) -> OwnerReference {
    let (kind, name, uid) = match &resource.owner_attributes.pod_uid {
        Some(pod_uid) => ("Pod", resource.owner.clone(), pod_uid.clone()),
        None => (
            "ServiceAccount",
            resource.owner_attributes.service_account_name.clone(),
            resource.owner_attributes.service_account_uid.clone(),
        ),
    };
    OwnerReference {
        api_version: "v1".to_string(),
        kind: kind.to_string(),
        name,
        uid,
        ..Default::default()
    }
}

fn workload_binding(resource: &Resource) -> WorkloadBinding {
    let attrs = &resource.owner_attributes;
    match &attrs.pod_uid {
        Some(pod_uid) => WorkloadBinding {
            kind: WorkloadKind::Pod,
            name: resource.owner.clone(),
            uid: pod_uid.clone(),
            namespace: attrs.namespace.clone(),
        },
        None => WorkloadBinding {
            kind: WorkloadKind::ServiceAccount,
            name: attrs.service_account_name.clone(),
            uid: attrs.service_account_uid.clone(),
            namespace: attrs.namespace.clone(),
        },
    }
}

/// Build the GeneratorState persisting one generator run
fn new_generator_state(
    generator: &GeneratorRef,
    resource: &Resource,
    state: BTreeMap<String, String>,
) -> GeneratorState {
    let mut labels = generator_state_labels(&resource.owner, &generator.name, &generator.kind);
    labels.insert(
        AUTH_METHOD_LABEL.to_string(),
        resource.auth_method.as_str().to_string(),
    );

    // Owner references cannot cross namespaces
    let owner_references = (resource.owner_attributes.namespace == generator.namespace)
        .then(|| vec![owner_reference(resource)]);

    let mut generator_state = GeneratorState::new(
        "",
        GeneratorStateSpec {
            generator_ref: generator.clone(),
            state,
        },
    );
    generator_state.metadata = ObjectMeta {
        generate_name: Some(GENERATOR_STATE_PREFIX.to_string()),
        namespace: Some(generator.namespace.clone()),
        labels: Some(labels),
        owner_references,
        ..Default::default()
    };
    generator_state
}

/// `POST /generators/{generatorNamespace}/{generatorKind}/{generatorName}`
pub async fn generate_secret(
    State(state): State<AppState>,
    Extension(info): Extension<AuthInfo>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
) -> Result<Json<BTreeMap<String, String>>> {
    let resource = Resource::from_auth_info(&name, &info)?;
    let generator = GeneratorRef::new(name, kind, namespace);
    authorize(&state, &info, &ResourceRequest::Generator(generator.clone()))?;

    let generated = state
        .generator
        .generate(&generator, &generator.namespace, &resource)
        .await
        .map_err(|e| Error::BadRequest(e.to_string()))?;

    // State is persisted before the credential is recorded
    let created = state
        .states
        .create(new_generator_state(&generator, &resource, generated.state))
        .await?;
    let state_name = created.metadata.name.clone().unwrap_or_default();

    let credential = IssuedCredential {
        source_ref: SourceRef {
            api_version: GENERATOR_API_VERSION.to_string(),
            kind: generator.kind.clone(),
            name: generator.name.clone(),
            namespace: Some(generator.namespace.clone()),
        },
        remote_ref: None,
        state_ref: Some(StateRef {
            name: state_name.clone(),
            namespace: generator.namespace.clone(),
        }),
        workload_binding: Some(workload_binding(&resource)),
        issued_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
    };
    state
        .ledger
        .record(&info.subject, &info.provider, info.method, credential)
        .await?;

    info!(
        generator = %generator,
        owner = %resource.owner,
        state = %state_name,
        subject = %info.subject,
        "Credential generated"
    );
    Ok(Json(generated.data))
}

/// `DELETE /generators/{generatorNamespace}/{generatorKind}/{generatorName}`
pub async fn revoke_self(
    State(state): State<AppState>,
    Extension(info): Extension<AuthInfo>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
) -> Result<Json<String>> {
    let resource = Resource::from_auth_info(&name, &info)?;
    let generator = GeneratorRef::new(name, kind, namespace);
    authorize(&state, &info, &ResourceRequest::Generator(generator.clone()))?;

    let labels = generator_state_labels(&resource.owner, &generator.name, &generator.kind);
    let deleted = state
        .states
        .delete_labeled(&generator.namespace, &labels)
        .await?;

    info!(generator = %generator, owner = %resource.owner, deleted, "Own credentials revoked");
    Ok(Json("GeneratorState deleted".to_string()))
}

/// `POST /generators/{generatorNamespace}/revoke`
pub async fn revoke_credentials_of(
    State(state): State<AppState>,
    Extension(info): Extension<AuthInfo>,
    Path(path_namespace): Path<String>,
    body: std::result::Result<Json<RevokeRequest>, JsonRejection>,
) -> Result<Json<String>> {
    let Json(body) = body.map_err(|e| Error::BadRequest(e.body_text()))?;
    if body.owner.is_empty() {
        return Err(Error::BadRequest("missing owner".into()));
    }
    let namespace = if body.namespace.is_empty() {
        path_namespace
    } else {
        body.namespace
    };

    authorize(
        &state,
        &info,
        &ResourceRequest::GeneratorState {
            namespace: namespace.clone(),
        },
    )?;

    let labels = BTreeMap::from([(OWNER_LABEL.to_string(), body.owner.clone())]);
    let deleted = state.states.delete_labeled(&namespace, &labels).await?;

    info!(
        namespace = %namespace,
        owner = %body.owner,
        subject = %info.subject,
        deleted,
        "Credentials revoked"
    );
    Ok(Json("GeneratorState deleted".to_string()))
}
