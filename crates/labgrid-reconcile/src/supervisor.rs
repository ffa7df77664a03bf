//! Restart-on-fault supervision for long-running loops.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use labgrid_core::LabConfig;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("{name}: restart budget exhausted after {restarts} restarts, last fault: {last_fault}")]
    BudgetExhausted {
        name: String,
        restarts: u32,
        last_fault: String,
    },
}

/// Runs a task, restarting it after a fault until `retry_budget`
/// restarts have been spent.
///
/// A fault is an `Err` return or a panic. A clean `Ok` return ends
/// supervision, as does `shutdown`.
#[derive(Debug, Clone)]
pub struct Supervisor {
    name: String,
    retry_budget: u32,
    restart_delay: Duration,
}

impl Supervisor {
    pub fn new(name: impl Into<String>, retry_budget: u32, restart_delay: Duration) -> Self {
        Self {
            name: name.into(),
            retry_budget,
            restart_delay,
        }
    }

    /// Budget and delay from the `[reconcile]` section.
    pub fn from_config(name: impl Into<String>, config: &LabConfig) -> Self {
        Self::new(name, config.reconcile.retry_budget, config.restart_delay())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn supervise<F, Fut>(
        &self,
        mut shutdown: watch::Receiver<bool>,
        task: F,
    ) -> Result<(), SupervisorError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut remaining = self.retry_budget;
        let mut restarts = 0u32;

        loop {
            let fault = match tokio::spawn(task()).await {
                Ok(Ok(())) => {
                    info!(task = %self.name, "supervised task exited");
                    return Ok(());
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(join_err) if join_err.is_panic() => {
                    format!("panic: {}", panic_message(join_err.into_panic()))
                }
                Err(join_err) => join_err.to_string(),
            };

            if *shutdown.borrow() {
                info!(task = %self.name, %fault, "fault during shutdown, not restarting");
                return Ok(());
            }

            if remaining == 0 {
                error!(task = %self.name, restarts, %fault, "restart budget exhausted");
                return Err(SupervisorError::BudgetExhausted {
                    name: self.name.clone(),
                    restarts,
                    last_fault: fault,
                });
            }
            remaining -= 1;
            restarts += 1;
            warn!(
                task = %self.name,
                %fault,
                restart = restarts,
                remaining,
                delay_ms = self.restart_delay.as_millis() as u64,
                "supervised task faulted, restarting"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.restart_delay) => {}
                _ = shutdown.changed() => {
                    info!(task = %self.name, "shutdown during restart delay");
                    return Ok(());
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
