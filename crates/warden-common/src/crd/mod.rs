//! Custom Resource Definitions for Warden
//!
//! All Warden CRDs live in the `federation.warden.dev` API group.

mod authorization;
mod authorized_identity;
mod federation;
mod generator_state;
mod types;

pub use authorization::{
    Authorization, AuthorizationSpec, FederationKind, FederationRef, GeneratorStateScope,
    OidcSubject, SpiffeSubject, Subject,
};
pub use authorized_identity::{
    identity_name, AuthMethod, AuthorizedIdentity, AuthorizedIdentitySpec,
    AuthorizedIdentityStatus, IssuedCredential, RemoteRef, SourceRef, StateRef, WorkloadBinding,
    WorkloadKind,
};
pub use federation::{
    KubernetesFederation, KubernetesFederationSpec, SpiffeFederation, SpiffeFederationSpec,
};
pub use generator_state::{GeneratorState, GeneratorStateSpec};
pub use types::{FederationPhase, FederationStatus, GeneratorRef, SecretKeyRef};

/// API group of every Warden CRD
pub const API_GROUP: &str = "federation.warden.dev";

/// API version of every Warden CRD
pub const API_VERSION: &str = "federation.warden.dev/v1alpha1";
