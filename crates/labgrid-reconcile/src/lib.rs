//! labgrid-reconcile: background loops that converge actual state
//! towards a desired invariant.
//!
//! # Architecture
//!
//! ```text
//! Supervisor (restart budget, fixed delay)
//!   └── run_reconcile_loop (interval ticker, shutdown watch)
//!       └── Reconciler::reconcile_once
//!           ├── AutoDestroyReconciler   idle servers -> AutoDestroyed
//!           └── AutoRemediateReconciler storage network access -> Enabled
//! ```
//!
//! A failing tick is logged and the loop waits for the next one. Faults
//! that escape the loop itself (panics, or an error return) reach the
//! [`Supervisor`], which restarts the loop until its budget runs out.
//!
//! Reconcilers write through the same store as the API without locks.
//! A sweep that races a user's deploy or destroy is corrected on a later
//! tick.

pub mod auto_destroy;
pub mod auto_remediate;
pub mod reconciler;
pub mod supervisor;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use auto_destroy::{AutoDestroyReconciler, SweepReport};
pub use auto_remediate::{AutoRemediateReconciler, RemediationOutcome};
pub use reconciler::{Reconciler, run_reconcile_loop};
pub use supervisor::{Supervisor, SupervisorError};

/// Spawn `reconciler` under `supervisor`. The task ends when `shutdown`
/// fires or the restart budget is exhausted.
pub fn start_supervised_loop(
    reconciler: Arc<dyn Reconciler>,
    supervisor: Supervisor,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<Result<(), SupervisorError>> {
    tokio::spawn(async move {
        let loop_shutdown = shutdown.clone();
        supervisor
            .supervise(shutdown, move || {
                let reconciler = reconciler.clone();
                let shutdown = loop_shutdown.clone();
                async move {
                    run_reconcile_loop(reconciler, shutdown).await;
                    anyhow::Ok(())
                }
            })
            .await
    })
}

pub fn start_auto_destroy_loop(
    reconciler: Arc<AutoDestroyReconciler>,
    supervisor: Supervisor,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<Result<(), SupervisorError>> {
    start_supervised_loop(reconciler, supervisor, shutdown)
}

pub fn start_auto_remediate_loop(
    reconciler: Arc<AutoRemediateReconciler>,
    supervisor: Supervisor,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<Result<(), SupervisorError>> {
    start_supervised_loop(reconciler, supervisor, shutdown)
}
