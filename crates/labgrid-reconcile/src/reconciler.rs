//! The polling loop shared by every reconciler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// One periodic convergence check: read actual state, compare it to the
/// desired invariant, correct on mismatch.
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    async fn reconcile_once(&self) -> anyhow::Result<()>;
}

/// Tick `reconciler` every `interval()` until `shutdown` fires.
///
/// The first tick runs immediately. A failed tick is logged and never
/// ends the loop. Shutdown interrupts an in-flight tick; store writes are
/// single atomic upserts, so no record is left half-written.
pub async fn run_reconcile_loop(
    reconciler: Arc<dyn Reconciler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = reconciler.name();
    let mut ticker = tokio::time::interval(reconciler.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        reconciler = name,
        interval_secs = reconciler.interval().as_secs(),
        "reconciler started"
    );

    if *shutdown.borrow() {
        info!(reconciler = name, "reconciler shutting down");
        return;
    }

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tokio::select! {
                    result = reconciler.reconcile_once() => {
                        if let Err(e) = result {
                            error!(reconciler = name, error = %e, "reconcile tick failed");
                        } else {
                            debug!(reconciler = name, "reconcile tick done");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    info!(reconciler = name, "reconciler shutting down");
}
