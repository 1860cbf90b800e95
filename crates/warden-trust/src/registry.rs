//! Trust registry
//!
//! Concurrent map from issuer (OIDC) or trust domain (SPIFFE) to the
//! Authorization policies that trust it, plus the federation providers
//! those policies point at.
//!
//! Policy lists are copy-on-write: every mutation builds a new
//! `Arc<[TrustedPolicy]>` and swaps it in, so a reader holding a snapshot
//! never sees a half-applied update and never blocks a writer for longer
//! than a pointer clone.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use warden_common::crd::{AuthorizationSpec, FederationRef};

use crate::provider::FederationProvider;

/// An Authorization policy as held by the registry
#[derive(Debug, Clone, PartialEq)]
pub struct TrustedPolicy {
    /// Name of the Authorization object
    pub name: String,
    /// Policy spec
    pub spec: AuthorizationSpec,
}

impl TrustedPolicy {
    /// Create a new trusted policy
    pub fn new(name: impl Into<String>, spec: AuthorizationSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }
}

/// What `remove_policy` removes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RemovalMode {
    /// Drop every policy trusting the issuer
    Bucket,
    /// Drop only the named policy
    #[default]
    Single,
}

impl FromStr for RemovalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bucket" => Ok(Self::Bucket),
            "single" => Ok(Self::Single),
            other => Err(format!(
                "unknown removal mode '{}', expected 'bucket' or 'single'",
                other
            )),
        }
    }
}

impl fmt::Display for RemovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bucket => write!(f, "bucket"),
            Self::Single => write!(f, "single"),
        }
    }
}

/// Registry of trusted policies and federation providers
pub struct TrustRegistry {
    /// Policies keyed by issuer or trust domain, newest first
    policies: DashMap<String, Arc<[TrustedPolicy]>>,
    /// Issuer each policy name is currently filed under
    index: DashMap<String, String>,
    /// Providers keyed by federation reference
    providers: DashMap<FederationRef, Arc<dyn FederationProvider>>,
    /// Behaviour of `remove_policy`
    removal_mode: RemovalMode,
}

impl Default for TrustRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TrustRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustRegistry")
            .field("issuers", &self.policies.len())
            .field("providers", &self.providers.len())
            .field("removal_mode", &self.removal_mode)
            .finish()
    }
}

impl TrustRegistry {
    /// Create an empty registry with single-entry removal
    pub fn new() -> Self {
        Self::with_removal_mode(RemovalMode::default())
    }

    /// Create an empty registry with the given removal behaviour
    pub fn with_removal_mode(removal_mode: RemovalMode) -> Self {
        Self {
            policies: DashMap::new(),
            index: DashMap::new(),
            providers: DashMap::new(),
            removal_mode,
        }
    }

    /// Removal behaviour in effect
    pub fn removal_mode(&self) -> RemovalMode {
        self.removal_mode
    }

    /// Register a policy under an issuer or trust domain
    ///
    /// The policy is prepended. A policy with the same name is replaced,
    /// including when it was previously filed under another issuer.
    pub fn add_policy(&self, issuer: &str, name: &str, spec: AuthorizationSpec) {
        if let Some(previous) = self.index.insert(name.to_string(), issuer.to_string()) {
            if previous != issuer {
                self.drop_named(&previous, name);
            }
        }

        let policy = TrustedPolicy::new(name, spec);
        match self.policies.entry(issuer.to_string()) {
            Entry::Occupied(mut slot) => {
                let next: Vec<TrustedPolicy> = std::iter::once(policy)
                    .chain(slot.get().iter().filter(|p| p.name != name).cloned())
                    .collect();
                slot.insert(Arc::from(next));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::from(vec![policy]));
            }
        }

        info!(issuer = %issuer, policy = %name, "Trusted policy registered");
    }

    /// Remove a policy; returns true if anything was removed
    ///
    /// In [`RemovalMode::Bucket`] every policy trusting the issuer is removed.
    pub fn remove_policy(&self, issuer: &str, name: &str) -> bool {
        let removed = match self.removal_mode {
            RemovalMode::Bucket => match self.policies.remove(issuer) {
                Some((_, bucket)) => {
                    for policy in bucket.iter() {
                        self.index.remove_if(&policy.name, |_, filed| filed == issuer);
                    }
                    true
                }
                None => false,
            },
            RemovalMode::Single => {
                self.index.remove_if(name, |_, filed| filed == issuer);
                self.drop_named(issuer, name)
            }
        };

        if removed {
            info!(issuer = %issuer, policy = %name, mode = %self.removal_mode, "Trusted policy removed");
        }
        removed
    }

    /// Snapshot of the policies trusting an issuer, newest first
    pub fn get_policies(&self, issuer: &str) -> Arc<[TrustedPolicy]> {
        self.policies
            .get(issuer)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Register the provider backing a federation
    pub fn add_provider(&self, federation: FederationRef, provider: Arc<dyn FederationProvider>) {
        debug!(federation = %federation, "Federation provider registered");
        self.providers.insert(federation, provider);
    }

    /// Provider backing a federation
    pub fn get_provider(&self, federation: &FederationRef) -> Option<Arc<dyn FederationProvider>> {
        self.providers
            .get(federation)
            .map(|entry| entry.value().clone())
    }

    /// Forget the provider backing a federation
    pub fn remove_provider(&self, federation: &FederationRef) -> bool {
        let removed = self.providers.remove(federation).is_some();
        if removed {
            debug!(federation = %federation, "Federation provider removed");
        }
        removed
    }

    /// Number of issuers with at least one policy
    pub fn issuer_count(&self) -> usize {
        self.policies.len()
    }

    /// Number of registered providers
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Remove one named policy from a bucket, dropping the bucket when empty
    fn drop_named(&self, issuer: &str, name: &str) -> bool {
        match self.policies.entry(issuer.to_string()) {
            Entry::Occupied(mut slot) => {
                if !slot.get().iter().any(|p| p.name == name) {
                    return false;
                }
                let next: Vec<TrustedPolicy> = slot
                    .get()
                    .iter()
                    .filter(|p| p.name != name)
                    .cloned()
                    .collect();
                if next.is_empty() {
                    slot.remove();
                } else {
                    slot.insert(Arc::from(next));
                }
                true
            }
            Entry::Vacant(_) => false,
        }
    }
}
