//! Workload identity formats
//!
//! Two subject shapes reach Warden:
//!
//! - SPIFFE IDs from mTLS client certificates, e.g.
//!   `spiffe://cluster.local/billing/ns/payments/sa/<uid>/api/pod/<uid>/api-7f9c`
//! - Kubernetes service account subjects from projected tokens, e.g.
//!   `system:serviceaccount:payments:api`

use std::fmt;

use crate::error::Error;

/// URI scheme prefix of every SPIFFE ID
pub const SPIFFE_SCHEME: &str = "spiffe://";

/// Prefix of Kubernetes service account token subjects
pub const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// A parsed SPIFFE ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiffeId {
    trust_domain: String,
    path: String,
}

impl SpiffeId {
    /// Parse a `spiffe://<trust-domain>/<path>` URI
    pub fn parse(id: &str) -> Result<Self, Error> {
        let rest = id
            .strip_prefix(SPIFFE_SCHEME)
            .ok_or_else(|| Error::validation(format!("not a SPIFFE ID: {}", id)))?;

        let (trust_domain, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        if trust_domain.is_empty() {
            return Err(Error::validation(format!(
                "SPIFFE ID has an empty trust domain: {}",
                id
            )));
        }

        Ok(Self {
            trust_domain: trust_domain.to_string(),
            path: path.to_string(),
        })
    }

    /// Trust domain (authority component)
    pub fn trust_domain(&self) -> &str {
        &self.trust_domain
    }

    /// Path component, including the leading `/`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decode the workload coordinates carried by the path
    pub fn workload(&self) -> Result<WorkloadPath, Error> {
        WorkloadPath::parse(&self.path)
    }
}

impl fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", SPIFFE_SCHEME, self.trust_domain, self.path)
    }
}

/// Workload coordinates encoded in a SPIFFE path
///
/// Layout: `/{app}/ns/{namespace}/sa/{saUID}/{saName}/pod/{podUID}/{podName}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadPath {
    /// Application segment
    pub app: String,
    /// Workload namespace
    pub namespace: String,
    /// Service account UID
    pub service_account_uid: String,
    /// Service account name
    pub service_account_name: String,
    /// Pod UID
    pub pod_uid: String,
    /// Pod name
    pub pod_name: String,
}

impl WorkloadPath {
    /// Parse a SPIFFE path; any deviation from the layout is rejected
    pub fn parse(path: &str) -> Result<Self, Error> {
        let invalid = || Error::validation(format!("invalid SPIFFE workload path: {}", path));

        let segments: Vec<&str> = path
            .strip_prefix('/')
            .ok_or_else(invalid)?
            .split('/')
            .collect();

        match segments.as_slice() {
            [app, "ns", namespace, "sa", sa_uid, sa_name, "pod", pod_uid, pod_name]
                if [app, namespace, sa_uid, sa_name, pod_uid, pod_name]
                    .iter()
                    .all(|s| !s.is_empty()) =>
            {
                Ok(Self {
                    app: app.to_string(),
                    namespace: namespace.to_string(),
                    service_account_uid: sa_uid.to_string(),
                    service_account_name: sa_name.to_string(),
                    pod_uid: pod_uid.to_string(),
                    pod_name: pod_name.to_string(),
                })
            }
            _ => Err(invalid()),
        }
    }
}

/// A Kubernetes service account subject (`system:serviceaccount:<ns>:<name>`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountSubject {
    /// Service account namespace
    pub namespace: String,
    /// Service account name
    pub name: String,
}

impl ServiceAccountSubject {
    /// Parse a token subject; returns None for non service account subjects
    pub fn parse(subject: &str) -> Option<Self> {
        let rest = subject.strip_prefix(SERVICE_ACCOUNT_PREFIX)?;
        let (namespace, name) = rest.split_once(':')?;
        if namespace.is_empty() || name.is_empty() || name.contains(':') {
            return None;
        }
        Some(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}
