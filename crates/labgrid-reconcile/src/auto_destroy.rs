//! Idle-server sweep.
//!
//! Each tick lists every record and tears down servers whose owner has
//! been inactive longer than the record's inactivity window, provided the
//! server itself reports idle. Torn-down records end `AutoDestroyed`.
//!
//! One bad record never stops the sweep: a malformed timestamp, a probe
//! error or a failed delete is logged and the next record is examined.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use labgrid_lifecycle::ServerLifecycle;
use labgrid_state::{Server, ServerStatus, StateResult, parse_timestamp};

use crate::reconciler::Reconciler;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub destroyed: Vec<String>,
    pub skipped: usize,
    /// Servers whose idle probe or teardown failed; retried next tick.
    pub failed: Vec<String>,
}

pub struct AutoDestroyReconciler {
    lifecycle: Arc<ServerLifecycle>,
    interval: Duration,
    provider_timeout: Duration,
}

impl AutoDestroyReconciler {
    pub fn new(lifecycle: Arc<ServerLifecycle>, interval: Duration, provider_timeout: Duration) -> Self {
        Self {
            lifecycle,
            interval,
            provider_timeout,
        }
    }

    /// Examine every record once.
    ///
    /// Only a failure to list the store is returned as an error.
    pub async fn sweep(&self) -> StateResult<SweepReport> {
        let servers = self.lifecycle.store().list_all()?;
        let now = Utc::now();
        let mut report = SweepReport::default();

        for server in servers {
            report.examined += 1;
            let user = server.user_principal_name.clone();

            match past_inactivity_limit(&server, now) {
                Ok(true) => {}
                Ok(false) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        %user,
                        value = %server.last_user_activity_time,
                        error = %e,
                        "unparseable activity timestamp, skipping"
                    );
                    report.skipped += 1;
                    continue;
                }
            }

            let Some(endpoint) = server.endpoint.clone() else {
                debug!(%user, status = %server.status, "inactive but no endpoint, skipping");
                report.skipped += 1;
                continue;
            };

            let probe = self.lifecycle.provider().ensure_idle(&endpoint);
            match tokio::time::timeout(self.provider_timeout, probe).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    debug!(%user, %endpoint, "inactive but server reports busy");
                    report.skipped += 1;
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(%user, %endpoint, error = %e, "idle probe failed");
                    report.failed.push(user);
                    continue;
                }
                Err(_) => {
                    warn!(%user, %endpoint, timeout_secs = self.provider_timeout.as_secs(), "idle probe timed out");
                    report.failed.push(user);
                    continue;
                }
            }

            let teardown = self.lifecycle.tear_down(server, ServerStatus::AutoDestroyed);
            match tokio::time::timeout(self.provider_timeout, teardown).await {
                Ok(Ok(_)) => report.destroyed.push(user),
                Ok(Err(e)) => {
                    warn!(%user, error = %e, "auto-destroy failed");
                    report.failed.push(user);
                }
                Err(_) => {
                    warn!(%user, timeout_secs = self.provider_timeout.as_secs(), "auto-destroy timed out");
                    report.failed.push(user);
                }
            }
        }

        Ok(report)
    }
}

/// Whether `server` is eligible for the sweep at `now`: auto-destroy is
/// on, something is deployed, and the last activity is older than the
/// inactivity window.
///
/// The timestamp is only parsed for records that pass the cheaper checks.
pub fn past_inactivity_limit(server: &Server, now: DateTime<Utc>) -> Result<bool, chrono::ParseError> {
    if !server.auto_destroy || server.status.is_at_rest() {
        return Ok(false);
    }
    let last_activity = parse_timestamp(&server.last_user_activity_time)?;
    let idle_for = now.signed_duration_since(last_activity);
    Ok(idle_for.num_seconds() > server.inactivity_duration_in_seconds as i64)
}

#[async_trait]
impl Reconciler for AutoDestroyReconciler {
    fn name(&self) -> &'static str {
        "auto-destroy"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn reconcile_once(&self) -> anyhow::Result<()> {
        let report = self.sweep().await.context("listing servers")?;
        if report.destroyed.is_empty() && report.failed.is_empty() {
            debug!(examined = report.examined, "auto-destroy sweep: nothing to do");
        } else {
            info!(
                examined = report.examined,
                destroyed = report.destroyed.len(),
                failed = report.failed.len(),
                skipped = report.skipped,
                "auto-destroy sweep finished"
            );
        }
        Ok(())
    }
}
