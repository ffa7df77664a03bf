//! Server lifecycle: the per-user state machine.
//!
//! ```text
//! (no record) ──register──▶ Registered ──deploy──▶ Deploying ──ready──▶ Running
//!                                                     │                    │
//!                                          not ready in budget     destroy / idle sweep
//!                                                     ▼                    ▼
//!                                                  Unknown      Destroyed / AutoDestroyed
//!                                                                          │
//!                                                                  deploy again
//! ```
//!
//! Records are read, modified and written back whole. Nothing locks a
//! record against the background sweep; the last upsert wins.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use labgrid_core::LabConfig;
use labgrid_provider::ComputeProvider;
use labgrid_state::{Server, ServerDefaults, ServerStatus, ServerStore, now_timestamp};

use crate::error::{LifecycleError, LifecycleResult};

/// Tunables for deploy readiness and record defaults.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub probe_path: String,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    /// Total time a deploy may spend waiting for readiness.
    pub wait_budget: Duration,
    pub defaults: ServerDefaults,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::from_config(&LabConfig::default())
    }
}

impl LifecycleConfig {
    pub fn from_config(config: &LabConfig) -> Self {
        Self {
            probe_path: config.deploy.probe_path.clone(),
            probe_interval: config.probe_interval(),
            probe_timeout: config.probe_timeout(),
            wait_budget: config.wait_budget(),
            defaults: ServerDefaults::from(&config.defaults),
        }
    }

    /// Readiness probes a deploy makes before giving up; at least one.
    pub fn readiness_attempts(&self) -> u32 {
        let interval = self.probe_interval.as_millis().max(1);
        let attempts = self.wait_budget.as_millis() / interval;
        attempts.clamp(1, u32::MAX as u128) as u32
    }
}

pub struct ServerLifecycle {
    store: Arc<dyn ServerStore>,
    provider: Arc<dyn ComputeProvider>,
    config: LifecycleConfig,
}

impl ServerLifecycle {
    pub fn new(
        store: Arc<dyn ServerStore>,
        provider: Arc<dyn ComputeProvider>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn ServerStore> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn ComputeProvider> {
        &self.provider
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Bind a user to a subscription and persist the record as `Registered`.
    ///
    /// Registering again rebinds the subscription but keeps the existing
    /// lifecycle state and policy flags.
    pub async fn register_subscription(
        &self,
        subscription_id: &str,
        user_principal_name: &str,
        user_principal_id: &str,
    ) -> LifecycleResult<Server> {
        let mut server = match self.store.get(user_principal_name)? {
            Some(mut existing) => {
                existing.subscription_id = subscription_id.to_string();
                existing.user_principal_id = user_principal_id.to_string();
                existing
            }
            None => Server::new(subscription_id, user_principal_name, user_principal_id),
        };
        self.config.defaults.apply(&mut server);
        self.validate(&server).await?;

        self.store.upsert(&server)?;
        info!(
            user = %server.user_principal_name,
            subscription = %server.subscription_id,
            status = %server.status,
            "subscription registered"
        );
        Ok(server)
    }

    /// Provision the user's server and wait until it answers its
    /// readiness probe.
    ///
    /// A record already `Deploying` or `Running` is returned unchanged and
    /// the provider is not called. If readiness is never confirmed the
    /// record is left `Unknown` and [`LifecycleError::DeployVerification`]
    /// is returned. A provisioning failure leaves the record `Deploying`.
    ///
    /// Dropping the returned future stops the readiness poll.
    pub async fn deploy(&self, request: &Server) -> LifecycleResult<Server> {
        let key = require_name(&request.user_principal_name)?;
        let mut server = self.store.require(key)?;

        if server.status.is_deploying_or_running() {
            debug!(user = %key, status = %server.status, "deploy already in flight");
            return Ok(server);
        }

        self.config.defaults.apply(&mut server);
        self.validate(&server).await?;

        let identity = self.provider.get_user_assigned_identity(&server).await?;
        server.managed_identity_client_id = identity.client_id;
        server.managed_identity_principal_id = identity.principal_id;
        server.managed_identity_resource_id = identity.resource_id;

        // A fresh deploy counts as activity, so the idle sweep leaves the
        // record alone while the readiness poll runs.
        server.status = ServerStatus::Deploying;
        server.last_user_activity_time = now_timestamp();
        server.endpoint = None;
        self.store.upsert(&server)?;
        info!(user = %key, region = %server.region, "deploying server");

        let deployment = match self.provider.deploy(&server).await {
            Ok(d) => d,
            Err(e) => {
                warn!(user = %key, error = %e, "provisioning failed, record left deploying");
                return Err(e.into());
            }
        };
        debug!(
            user = %key,
            endpoint = %deployment.endpoint,
            state = %deployment.provisioning_state,
            "container group provisioned"
        );
        server.endpoint = Some(deployment.endpoint.clone());
        self.store.upsert(&server)?;

        let ready = self.wait_until_ready(&deployment.endpoint).await;
        self.ensure_still_deploying(key)?;

        match ready {
            Ok(attempts) => {
                let now = now_timestamp();
                server.status = ServerStatus::Running;
                server.deployed_at_time = now.clone();
                server.last_user_activity_time = now;
                self.store.upsert(&server)?;
                info!(user = %key, endpoint = %deployment.endpoint, attempts, "server running");
                Ok(server)
            }
            Err(attempts) => {
                server.status = ServerStatus::Unknown;
                self.store.upsert(&server)?;
                warn!(user = %key, endpoint = %deployment.endpoint, attempts, "server never became ready");
                Err(LifecycleError::DeployVerification {
                    user: key.to_string(),
                    attempts,
                })
            }
        }
    }

    /// Fails if another writer moved the record out of `Deploying` while
    /// the readiness poll ran; its status must not be overwritten.
    fn ensure_still_deploying(&self, key: &str) -> LifecycleResult<()> {
        let current = self.store.require(key)?;
        if current.status == ServerStatus::Deploying {
            return Ok(());
        }
        warn!(user = %key, status = %current.status, "record changed during deploy, not overwriting");
        Err(LifecycleError::Superseded {
            user: key.to_string(),
            status: current.status,
        })
    }

    /// Probe readiness every `probe_interval` until it succeeds or the
    /// attempts run out. Returns the attempt count either way.
    async fn wait_until_ready(&self, endpoint: &str) -> Result<u32, u32> {
        let attempts = self.config.readiness_attempts();
        for attempt in 1..=attempts {
            tokio::time::sleep(self.config.probe_interval).await;
            let probe = self.provider.ensure_up(endpoint, &self.config.probe_path);
            match tokio::time::timeout(self.config.probe_timeout, probe).await {
                Ok(Ok(())) => return Ok(attempt),
                Ok(Err(e)) => debug!(%endpoint, attempt, error = %e, "not ready yet"),
                Err(_) => debug!(%endpoint, attempt, "readiness probe timed out"),
            }
        }
        Err(attempts)
    }

    /// Tear down the user's server. On a provider failure the record is
    /// not touched.
    pub async fn destroy(&self, user_principal_name: &str) -> LifecycleResult<Server> {
        let key = require_name(user_principal_name)?;
        let server = self.store.require(key)?;
        self.validate(&server).await?;
        self.tear_down(server, ServerStatus::Destroyed).await
    }

    /// Delete the container group and record `final_status`.
    ///
    /// Shared by [`ServerLifecycle::destroy`] and the idle sweep. The
    /// record is written only after the provider confirms the delete.
    pub async fn tear_down(
        &self,
        mut server: Server,
        final_status: ServerStatus,
    ) -> LifecycleResult<Server> {
        if let Err(e) = self.provider.destroy(&server).await {
            warn!(user = %server.user_principal_name, error = %e, "destroy failed, record unchanged");
            return Err(e.into());
        }

        server.status = final_status;
        server.destroyed_at_time = now_timestamp();
        server.endpoint = None;
        self.store.upsert(&server)?;
        info!(user = %server.user_principal_name, status = %final_status, "server destroyed");
        Ok(server)
    }

    /// The stored record, or a synthetic `Unregistered` one.
    pub fn get_server(&self, user_principal_name: &str) -> LifecycleResult<Server> {
        let key = require_name(user_principal_name)?;
        Ok(self
            .store
            .get(key)?
            .unwrap_or_else(|| Server::unregistered(key)))
    }

    /// Apply the mutable policy flags from `request`. Every other field of
    /// `request` is ignored.
    pub async fn update_server(&self, request: &Server) -> LifecycleResult<Server> {
        let key = require_name(&request.user_principal_name)?;
        let mut server = self.store.require(key)?;

        server.auto_create = request.auto_create;
        server.auto_destroy = request.auto_destroy;
        server.inactivity_duration_in_seconds = request.inactivity_duration_in_seconds;
        self.config.defaults.apply(&mut server);

        self.validate(&server).await?;
        self.store.upsert(&server)?;
        info!(
            user = %key,
            auto_create = server.auto_create,
            auto_destroy = server.auto_destroy,
            inactivity_secs = server.inactivity_duration_in_seconds,
            "server policy updated"
        );
        Ok(server)
    }

    /// Record user activity now. The idle sweep measures from this stamp.
    pub fn update_activity_status(&self, user_principal_name: &str) -> LifecycleResult<Server> {
        let key = require_name(user_principal_name)?;
        let mut server = self.store.require(key)?;
        server.last_user_activity_time = now_timestamp();
        self.store.upsert(&server)?;
        debug!(user = %key, at = %server.last_user_activity_time, "activity recorded");
        Ok(server)
    }

    /// Identity fields must be present and the principal must own the
    /// subscription. Nothing is written before this passes.
    async fn validate(&self, server: &Server) -> LifecycleResult<()> {
        let missing: Vec<&str> = [
            ("user_principal_name", &server.user_principal_name),
            ("user_principal_id", &server.user_principal_id),
            ("subscription_id", &server.subscription_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(LifecycleError::Validation(format!(
                "missing {}",
                missing.join(", ")
            )));
        }
        if server.user_alias.is_empty() {
            return Err(LifecycleError::Validation(format!(
                "cannot derive alias from {:?}",
                server.user_principal_name
            )));
        }

        match self
            .provider
            .is_subscription_owner(&server.user_principal_id, &server.subscription_id)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(LifecycleError::Authorization(format!(
                "{} does not hold Owner on subscription {}",
                server.user_principal_name, server.subscription_id
            ))),
            Err(e) => Err(LifecycleError::Authorization(format!(
                "ownership check failed: {e}"
            ))),
        }
    }
}

fn require_name(user_principal_name: &str) -> LifecycleResult<&str> {
    if user_principal_name.trim().is_empty() {
        return Err(LifecycleError::Validation(
            "missing user_principal_name".to_string(),
        ));
    }
    Ok(user_principal_name)
}
