//! Credential ledger and lifecycle reconciler
//!
//! Handlers record every credential they hand out through the
//! [`CredentialLedger`]. The [`Reconciler`] later walks those records and
//! drops credentials whose generator state or workload has gone away.

#![deny(missing_docs)]

pub mod controller;
pub mod credentials;
pub mod error;
pub mod reconciler;

pub use controller::{Context, DEFAULT_RECONCILE_INTERVAL};
pub use credentials::{upsert_credential, CredentialLedger};
pub use error::{ReconcileError, Result};
pub use reconciler::{CredentialStatus, ReconcileOutcome, Reconciler};
