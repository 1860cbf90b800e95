//! Warden - federated workload identity server

mod backend;
mod crds;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use kube::Client;
use tracing::info;

use warden_api::{start_server, ServerConfig};
use warden_common::telemetry::{init_telemetry, TelemetryConfig};
use warden_lifecycle::controller::{run_controller, run_sweeper};
use warden_trust::{run_trust_watchers, RemovalMode, TrustRegistry};

use crate::backend::{read_manifest, BackendSettings};
use crate::crds::{ensure_crds_installed, render_crds};

/// Where Warden keeps its records
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StoreBackend {
    /// CRDs in the cluster
    Kube,
    /// Process memory; trust objects come from `--trust-manifest`
    Memory,
}

/// Warden - authenticates workloads and brokers their credentials
#[derive(Parser, Debug)]
#[command(name = "warden", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Address to serve HTTPS on
    #[arg(long, env = "WARDEN_BIND_ADDRESS", default_value = "0.0.0.0:8443")]
    bind_address: SocketAddr,

    /// Server certificate (PEM)
    #[arg(long, env = "WARDEN_TLS_CERT", default_value = "/etc/warden/tls/tls.crt")]
    tls_cert: PathBuf,

    /// Server private key (PEM)
    #[arg(long, env = "WARDEN_TLS_KEY", default_value = "/etc/warden/tls/tls.key")]
    tls_key: PathBuf,

    /// SPIFFE trust bundle (PEM); enables mTLS authentication
    #[arg(long, env = "WARDEN_SPIFFE_BUNDLE")]
    spiffe_bundle: Option<PathBuf>,

    /// What deleting an Authorization removes: `single` or `bucket`
    #[arg(long, env = "WARDEN_POLICY_REMOVAL", default_value = "single")]
    policy_removal: RemovalMode,

    /// Seconds between lifecycle reconciliations of a record
    #[arg(long, env = "WARDEN_RECONCILE_INTERVAL", default_value_t = 60)]
    reconcile_interval: u64,

    /// Required OIDC audience; repeat or comma-separate for several
    #[arg(long = "oidc-audience", env = "WARDEN_OIDC_AUDIENCES", value_delimiter = ',')]
    oidc_audiences: Vec<String>,

    /// Record store backend; `memory` serves only the Secrets declared in
    /// `--trust-manifest`, mapped to stores by `--secret-store`
    #[arg(long, env = "WARDEN_STORE_BACKEND", value_enum, default_value = "kube")]
    store_backend: StoreBackend,

    /// Secret store mapping `name=namespace`; repeatable
    #[arg(long = "secret-store", value_parser = parse_secret_store)]
    secret_stores: Vec<(String, String)>,

    /// Static Authorization, federation and Secret manifest to load at startup
    #[arg(long, env = "WARDEN_TRUST_MANIFEST")]
    trust_manifest: Option<PathBuf>,

    /// Human readable logs instead of JSON
    #[arg(long, env = "WARDEN_LOG_TEXT")]
    log_text: bool,
}

/// Parse a `name=namespace` secret store mapping
fn parse_secret_store(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, namespace)) if !name.is_empty() && !namespace.is_empty() => {
            Ok((name.to_string(), namespace.to_string()))
        }
        _ => Err(format!("expected name=namespace, got '{}'", value)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider before any TLS is configured
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        print!("{}", render_crds()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json: !cli.log_text,
        ..Default::default()
    })?;

    run(cli).await
}

fn read_pem(path: &Path, what: &str) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {} {}", what, path.display()))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let server_config = ServerConfig {
        addr: cli.bind_address,
        cert_pem: read_pem(&cli.tls_cert, "TLS certificate")?,
        key_pem: read_pem(&cli.tls_key, "TLS key")?,
        spiffe_bundle_pem: cli
            .spiffe_bundle
            .as_ref()
            .map(|path| read_pem(path, "SPIFFE bundle"))
            .transpose()?,
    };

    let settings = BackendSettings {
        oidc_audiences: cli.oidc_audiences.clone(),
        spiffe_enabled: server_config.spiffe_bundle_pem.is_some(),
        reconcile_interval: Duration::from_secs(cli.reconcile_interval),
        secret_stores: cli.secret_stores.iter().cloned().collect::<BTreeMap<_, _>>(),
        trust_manifest: cli
            .trust_manifest
            .as_deref()
            .map(read_manifest)
            .transpose()?,
    };

    let registry = Arc::new(TrustRegistry::with_removal_mode(cli.policy_removal));
    info!(
        backend = ?cli.store_backend,
        removal_mode = %cli.policy_removal,
        interval_secs = cli.reconcile_interval,
        "Starting warden"
    );

    match cli.store_backend {
        StoreBackend::Kube => {
            let client = Client::try_default()
                .await
                .context("failed to create Kubernetes client")?;
            ensure_crds_installed(&client).await?;

            let backend = backend::kubernetes(client.clone(), registry, &settings).await?;
            tokio::select! {
                result = run_trust_watchers(backend.trust) => result.context("trust watchers stopped")?,
                result = run_controller(client, backend.lifecycle) => result.context("lifecycle controller stopped")?,
                result = start_server(server_config, backend.state) => result.context("server stopped")?,
            }
        }
        StoreBackend::Memory => {
            let backend = backend::memory(registry, &settings).await?;
            tokio::select! {
                result = run_sweeper(backend.lifecycle) => result.context("lifecycle sweeper stopped")?,
                result = start_server(server_config, backend.state) => result.context("server stopped")?,
                _ = tokio::signal::ctrl_c() => {}
            }
        }
    }

    info!("Warden stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_store_mapping_parses() {
        assert_eq!(
            parse_secret_store("vault=secrets").unwrap(),
            ("vault".to_string(), "secrets".to_string())
        );
        assert!(parse_secret_store("vault").is_err());
        assert!(parse_secret_store("=secrets").is_err());
        assert!(parse_secret_store("vault=").is_err());
    }

    #[test]
    fn defaults_are_applied() {
        let cli = Cli::try_parse_from(["warden"]).unwrap();
        assert_eq!(cli.bind_address, "0.0.0.0:8443".parse().unwrap());
        assert_eq!(cli.policy_removal, RemovalMode::Single);
        assert_eq!(cli.reconcile_interval, 60);
        assert_eq!(cli.store_backend, StoreBackend::Kube);
        assert!(cli.oidc_audiences.is_empty());
    }

    #[test]
    fn flags_are_parsed() {
        let cli = Cli::try_parse_from([
            "warden",
            "--policy-removal",
            "bucket",
            "--store-backend",
            "memory",
            "--oidc-audience",
            "warden,vault",
            "--secret-store",
            "vault=secrets",
            "--secret-store",
            "aws=aws-secrets",
        ])
        .unwrap();
        assert_eq!(cli.policy_removal, RemovalMode::Bucket);
        assert_eq!(cli.store_backend, StoreBackend::Memory);
        assert_eq!(cli.oidc_audiences, vec!["warden", "vault"]);
        assert_eq!(cli.secret_stores.len(), 2);
    }

    #[test]
    fn bad_removal_mode_is_rejected() {
        assert!(Cli::try_parse_from(["warden", "--policy-removal", "all"]).is_err());
    }
}
