//! Trust registry, federation providers and policy matching
//!
//! ```text
//!   Authorization / *Federation objects
//!                 │ (watchers)
//!                 ▼
//!          ┌──────────────┐  issuer or trust domain  ┌───────────────────┐
//!          │ TrustRegistry│ ───────────────────────▶ │ [TrustedPolicy]   │
//!          └──────────────┘                          └───────────────────┘
//!                 │ federationRef                            │
//!                 ▼                                          ▼
//!       FederationProvider                           match_policy()
//!   (JWKS, identity existence)                 (subject + resource allow-list)
//! ```

#![deny(missing_docs)]

pub mod controller;
pub mod error;
pub mod jwks;
pub mod matcher;
pub mod provider;
pub mod registry;

pub use controller::{load_manifests, run_trust_watchers, TrustContext};
pub use error::{Result, TrustError};
pub use jwks::{Jwk, JwkSet};
pub use matcher::{match_policy, ResourceRequest};
pub use provider::{resolve_jwks, FederationProvider, JwksRequest};
pub use registry::{RemovalMode, TrustRegistry, TrustedPolicy};
