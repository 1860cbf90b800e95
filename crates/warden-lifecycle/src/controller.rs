//! AuthorizedIdentity controller
//!
//! Reconciles each record when it changes and again on a fixed interval,
//! so credentials bound to deleted workloads are pruned even when nothing
//! touches the record itself.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info, warn};

use warden_common::crd::AuthorizedIdentity;

use crate::error::{ReconcileError, Result};
use crate::reconciler::{ReconcileOutcome, Reconciler};

/// Default time between reconciles of one record
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Requeue delay after a failed reconcile
pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Shared context for the lifecycle controller
pub struct Context {
    reconciler: Arc<Reconciler>,
    interval: Duration,
}

impl Context {
    /// Create a new context
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    /// Get the reconciler
    pub fn reconciler(&self) -> Arc<Reconciler> {
        self.reconciler.clone()
    }

    /// Get the reconcile interval
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Reconcile one AuthorizedIdentity
pub async fn reconcile(
    identity: Arc<AuthorizedIdentity>,
    ctx: Arc<Context>,
) -> std::result::Result<Action, ReconcileError> {
    let name = identity.name_any();
    debug!(identity = %name, "Reconciling AuthorizedIdentity");

    match ctx.reconciler.reconcile_identity(&name).await? {
        ReconcileOutcome::Missing | ReconcileOutcome::Deleted { .. } => Ok(Action::await_change()),
        ReconcileOutcome::Kept { .. } => Ok(Action::requeue(ctx.interval)),
    }
}

/// Error policy for the lifecycle controller
pub fn error_policy(
    identity: Arc<AuthorizedIdentity>,
    error: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    warn!(
        identity = %identity.name_any(),
        error = %error,
        "Lifecycle reconciliation error, will retry"
    );
    Action::requeue(ERROR_REQUEUE)
}

/// Start the lifecycle controller against the cluster
pub async fn run_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    let identities: Api<AuthorizedIdentity> = Api::all(client);

    info!(interval = ?ctx.interval, "Starting lifecycle controller");

    Controller::new(identities, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    debug!(?action, "Lifecycle reconciliation completed");
                }
                Err(e) => {
                    error!(error = ?e, "Lifecycle reconciliation error");
                }
            }
        })
        .await;

    Ok(())
}

/// Reconcile every stored record once
///
/// Returns the number of records that failed.
pub async fn sweep(reconciler: &Reconciler) -> Result<usize> {
    let identities = reconciler.ledger().store().list().await?;
    let mut failures = 0;

    for identity in identities {
        let name = identity.name_any();
        if let Err(e) = reconciler.reconcile_identity(&name).await {
            warn!(identity = %name, error = %e, "Lifecycle sweep failed for identity");
            failures += 1;
        }
    }
    Ok(failures)
}

/// Periodically sweep all records (for stores without a watch API)
pub async fn run_sweeper(ctx: Arc<Context>) -> Result<()> {
    info!(interval = ?ctx.interval, "Starting lifecycle sweeper");

    let mut interval = tokio::time::interval(ctx.interval);
    loop {
        interval.tick().await;
        match sweep(&ctx.reconciler).await {
            Ok(0) => debug!("Lifecycle sweep completed"),
            Ok(failures) => warn!(failures, "Lifecycle sweep completed with failures"),
            Err(e) => error!(error = %e, "Lifecycle sweep failed"),
        }
    }
}
