//! CRD installation
//!
//! Warden installs its own CRDs on startup using server-side apply so the
//! schemas always match the running version.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use tracing::info;

use warden_common::crd::{
    Authorization, AuthorizedIdentity, GeneratorState, KubernetesFederation, SpiffeFederation,
};
use warden_common::FIELD_MANAGER;

/// Every CRD Warden serves
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        Authorization::crd(),
        KubernetesFederation::crd(),
        SpiffeFederation::crd(),
        AuthorizedIdentity::crd(),
        GeneratorState::crd(),
    ]
}

/// Render every CRD as one multi-document YAML stream
pub fn render_crds() -> anyhow::Result<String> {
    let mut out = String::new();
    for crd in all_crds() {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&crd)?);
    }
    Ok(out)
}

/// Install or update every CRD
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        info!(crd = %name, "Installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", name, e))?;
    }
    info!("CRDs installed/updated");
    Ok(())
}
