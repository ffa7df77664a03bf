//! Storage posture remediation: keeps public network access on the shared
//! storage account enabled.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

use labgrid_provider::{NetworkAccess, StorageAccess};

use crate::reconciler::Reconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// Access was already enabled; nothing was written.
    Compliant,
    /// Access was disabled and has been re-enabled.
    Remediated,
}

pub struct AutoRemediateReconciler {
    storage: Arc<dyn StorageAccess>,
    interval: Duration,
    provider_timeout: Duration,
}

impl AutoRemediateReconciler {
    pub fn new(storage: Arc<dyn StorageAccess>, interval: Duration, provider_timeout: Duration) -> Self {
        Self {
            storage,
            interval,
            provider_timeout,
        }
    }

    pub async fn remediate(&self) -> anyhow::Result<RemediationOutcome> {
        let current = tokio::time::timeout(self.provider_timeout, self.storage.public_network_access())
            .await
            .context("reading storage network access timed out")?
            .context("reading storage network access")?;

        if current == NetworkAccess::Enabled {
            debug!("storage network access compliant");
            return Ok(RemediationOutcome::Compliant);
        }

        tokio::time::timeout(
            self.provider_timeout,
            self.storage.set_public_network_access(NetworkAccess::Enabled),
        )
        .await
        .context("enabling storage network access timed out")?
        .context("enabling storage network access")?;

        info!(previous = ?current, "storage network access re-enabled");
        Ok(RemediationOutcome::Remediated)
    }
}

#[async_trait]
impl Reconciler for AutoRemediateReconciler {
    fn name(&self) -> &'static str {
        "auto-remediate"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn reconcile_once(&self) -> anyhow::Result<()> {
        self.remediate().await.map(|_| ())
    }
}
