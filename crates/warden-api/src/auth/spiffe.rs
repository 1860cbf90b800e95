//! SPIFFE mTLS authentication
//!
//! The identity is the SPIFFE ID in the URI SAN of the leaf client
//! certificate. Its path must encode the full workload coordinates.

use async_trait::async_trait;
use tracing::debug;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::parse_x509_certificate;

use warden_common::crd::AuthMethod;
use warden_common::identity::{SpiffeId, SPIFFE_SCHEME};

use super::{AuthError, AuthInfo, AuthRequest, Authenticator, KubeAttributes, ObjectIdentity};

/// Extract the SPIFFE ID from a DER certificate's URI SAN
pub fn spiffe_id_from_der(der: &[u8]) -> Result<SpiffeId, AuthError> {
    let (_, cert) = parse_x509_certificate(der)
        .map_err(|e| AuthError::InvalidCertificate(format!("failed to parse certificate: {}", e)))?;

    let san = cert
        .subject_alternative_name()
        .map_err(|e| AuthError::InvalidCertificate(format!("invalid SAN extension: {}", e)))?
        .ok_or_else(|| AuthError::InvalidCertificate("certificate has no SAN".into()))?;

    let uri = san
        .value
        .general_names
        .iter()
        .find_map(|name| match name {
            GeneralName::URI(uri) if uri.starts_with(SPIFFE_SCHEME) => Some(*uri),
            _ => None,
        })
        .ok_or_else(|| AuthError::InvalidCertificate("no SPIFFE URI SAN".into()))?;

    SpiffeId::parse(uri).map_err(|e| AuthError::InvalidCertificate(e.to_string()))
}

/// Authenticates workloads by their SPIFFE client certificate
#[derive(Debug, Default, Clone)]
pub struct SpiffeAuthenticator;

impl SpiffeAuthenticator {
    /// Create a SPIFFE authenticator
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Authenticator for SpiffeAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthInfo, AuthError> {
        let leaf = request
            .client_certs
            .as_ref()
            .and_then(|chain| chain.leaf())
            .ok_or(AuthError::MissingCertificate)?;

        let id = spiffe_id_from_der(leaf)?;
        let workload = id
            .workload()
            .map_err(|e| AuthError::InvalidCertificate(e.to_string()))?;

        debug!(spiffe_id = %id, namespace = %workload.namespace, "Extracted SPIFFE identity");

        Ok(AuthInfo {
            method: AuthMethod::Spiffe,
            provider: id.trust_domain().to_string(),
            subject: id.to_string(),
            kube_attributes: Some(KubeAttributes {
                namespace: workload.namespace,
                service_account: Some(ObjectIdentity {
                    name: workload.service_account_name,
                    uid: workload.service_account_uid,
                }),
                pod: Some(ObjectIdentity {
                    name: workload.pod_name,
                    uid: workload.pod_uid,
                }),
            }),
        })
    }
}
