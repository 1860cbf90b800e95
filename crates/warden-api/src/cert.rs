//! TLS configuration and client certificate capture
//!
//! The server always terminates TLS. Client certificates are optional
//! because bearer-token callers do not present one. When a SPIFFE trust
//! bundle is configured, presented chains must verify against it; without
//! a bundle the server does not request client certificates at all, so an
//! unverified certificate can never reach the SPIFFE authenticator.

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::danger::ClientCertVerifier;
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Client certificate chain extracted from the TLS connection
///
/// Stored as a request extension so authenticators can reach it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientCertChain(pub Vec<Vec<u8>>);

impl ClientCertChain {
    /// Create from certificate DER bytes, leaf first
    pub fn new(certs: Vec<Vec<u8>>) -> Self {
        Self(certs)
    }

    /// Build from the peer certificates rustls reports for a connection
    pub fn from_peer(certs: &[CertificateDer<'_>]) -> Self {
        Self(certs.iter().map(|cert| cert.as_ref().to_vec()).collect())
    }

    /// Check if any certificates were provided
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// End-entity certificate
    pub fn leaf(&self) -> Option<&[u8]> {
        self.0.first().map(Vec::as_slice)
    }
}

/// Parse every certificate in a PEM bundle
pub fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("invalid certificate PEM: {}", e)))?;
    if certs.is_empty() {
        return Err(Error::Config("no certificates found in PEM".into()));
    }
    Ok(certs)
}

/// Build the client certificate verifier for a SPIFFE trust bundle
///
/// Unauthenticated clients are still admitted; they must authenticate with
/// a bearer token instead.
pub fn spiffe_client_verifier(
    bundle_pem: &[u8],
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn ClientCertVerifier>> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(bundle_pem)? {
        roots
            .add(cert)
            .map_err(|e| Error::Config(format!("invalid trust bundle certificate: {}", e)))?;
    }

    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
        .allow_unauthenticated()
        .build()
        .map_err(|e| Error::Config(format!("failed to build client verifier: {}", e)))
}

/// Build the rustls server configuration
pub fn load_tls_config(
    cert_pem: &[u8],
    key_pem: &[u8],
    spiffe_bundle_pem: Option<&[u8]>,
) -> Result<Arc<rustls::ServerConfig>> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let certs = parse_certificates(cert_pem)?;
    let key = PrivateKeyDer::from_pem_slice(key_pem)
        .map_err(|e| Error::Config(format!("invalid private key PEM: {}", e)))?;

    let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("unsupported TLS versions: {}", e)))?;

    let builder = match spiffe_bundle_pem {
        Some(bundle) => {
            info!("Verifying client certificates against the SPIFFE trust bundle");
            builder.with_client_cert_verifier(spiffe_client_verifier(bundle, provider)?)
        }
        None => {
            warn!("No SPIFFE trust bundle configured, client certificates are not requested");
            builder.with_no_client_auth()
        }
    };

    let mut config = builder
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("invalid server certificate: {}", e)))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}
