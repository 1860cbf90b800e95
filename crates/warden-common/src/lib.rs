//! Common types for Warden: CRDs, stores, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod identity;
pub mod store;
pub mod telemetry;
pub mod yaml;

use std::collections::BTreeMap;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "warden-controller";

/// Label carrying the owning workload name (pod name, else service account)
pub const OWNER_LABEL: &str = "warden.dev/owner";

/// Label carrying the generator name that produced a GeneratorState
pub const GENERATOR_NAME_LABEL: &str = "warden.dev/generator-name";

/// Label carrying the generator kind that produced a GeneratorState
pub const GENERATOR_KIND_LABEL: &str = "warden.dev/generator-kind";

/// Label carrying the authentication method of the requester
pub const AUTH_METHOD_LABEL: &str = "warden.dev/auth-method";

/// Labels identifying the generator states of one owner and generator
pub fn generator_state_labels(owner: &str, name: &str, kind: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OWNER_LABEL.to_string(), owner.to_string()),
        (GENERATOR_NAME_LABEL.to_string(), name.to_string()),
        (GENERATOR_KIND_LABEL.to_string(), kind.to_string()),
    ])
}

/// Render labels as a Kubernetes label selector (`k=v,k2=v2`)
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
