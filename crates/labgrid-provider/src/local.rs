//! Config-driven provider for standalone mode.
//!
//! Nothing is provisioned: endpoints come from a template, ownership
//! from the `[provider.owners]` table, and identities are derived from
//! the record. The probes are real, so a server started by hand at the
//! rendered endpoint goes through the same readiness and idle checks a
//! cloud-provisioned one would.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use labgrid_core::config::ProviderConfig;
use labgrid_state::Server;

use crate::error::{ProviderError, ProviderResult};
use crate::probe::{check_ready, idle_probe};
use crate::traits::{ComputeProvider, Deployment, ManagedIdentity, NetworkAccess, StorageAccess};

pub struct LocalProvider {
    config: ProviderConfig,
    probe_timeout: Duration,
    network_access: Mutex<NetworkAccess>,
}

impl LocalProvider {
    pub fn new(config: ProviderConfig, probe_timeout: Duration) -> Self {
        Self {
            config,
            probe_timeout,
            network_access: Mutex::new(NetworkAccess::Enabled),
        }
    }

    pub fn endpoint_for(&self, server: &Server) -> String {
        self.config
            .endpoint_template
            .replace("{alias}", &server.user_alias)
    }

    fn access(&self) -> std::sync::MutexGuard<'_, NetworkAccess> {
        self.network_access
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Stable pseudo-GUID derived from the given parts.
fn derived_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let h = hex::encode(hasher.finalize());
    format!("{}-{}-{}-{}-{}", &h[0..8], &h[8..12], &h[12..16], &h[16..20], &h[20..32])
}

#[async_trait]
impl ComputeProvider for LocalProvider {
    async fn deploy(&self, server: &Server) -> ProviderResult<Deployment> {
        if server.user_alias.is_empty() {
            return Err(ProviderError::Rejected("server has no alias".to_string()));
        }
        let endpoint = self.endpoint_for(server);
        info!(user = %server.user_principal_name, %endpoint, "container group requested");
        Ok(Deployment {
            endpoint,
            provisioning_state: "Succeeded".to_string(),
        })
    }

    async fn destroy(&self, server: &Server) -> ProviderResult<()> {
        info!(user = %server.user_principal_name, "container group deleted");
        Ok(())
    }

    async fn ensure_up(&self, endpoint: &str, probe_path: &str) -> ProviderResult<()> {
        check_ready(endpoint, probe_path, self.probe_timeout).await
    }

    async fn ensure_idle(&self, endpoint: &str) -> ProviderResult<bool> {
        idle_probe(endpoint, &self.config.idle_path, self.probe_timeout).await
    }

    async fn get_user_assigned_identity(&self, server: &Server) -> ProviderResult<ManagedIdentity> {
        let name = format!("{}-identity", server.user_alias);
        let resource_id = format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ManagedIdentity/userAssignedIdentities/{}",
            server.subscription_id, server.resource_group, name
        );
        let identity = ManagedIdentity {
            client_id: derived_id(&["client", &resource_id]),
            principal_id: derived_id(&["principal", &resource_id]),
            resource_id,
        };
        debug!(user = %server.user_principal_name, resource_id = %identity.resource_id, "identity resolved");
        Ok(identity)
    }

    async fn is_subscription_owner(
        &self,
        principal_id: &str,
        subscription_id: &str,
    ) -> ProviderResult<bool> {
        Ok(self
            .config
            .owners
            .get(subscription_id)
            .is_some_and(|owners| owners.iter().any(|o| o == principal_id)))
    }
}

#[async_trait]
impl StorageAccess for LocalProvider {
    async fn public_network_access(&self) -> ProviderResult<NetworkAccess> {
        Ok(*self.access())
    }

    async fn set_public_network_access(&self, access: NetworkAccess) -> ProviderResult<()> {
        *self.access() = access;
        info!(account = %self.config.storage_account, ?access, "storage network access updated");
        Ok(())
    }
}
