//! Capability traits consumed by the lifecycle and the reconcilers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use labgrid_state::Server;

use crate::error::ProviderResult;

/// Result of provisioning a container group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    /// `host:port` the server is reachable on.
    pub endpoint: String,
    /// Provisioning state as reported by the provider.
    pub provisioning_state: String,
}

/// A user-assigned managed identity bound to a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedIdentity {
    pub client_id: String,
    pub principal_id: String,
    pub resource_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkAccess {
    Enabled,
    Disabled,
}

/// Compute operations for one user's container group.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn deploy(&self, server: &Server) -> ProviderResult<Deployment>;

    async fn destroy(&self, server: &Server) -> ProviderResult<()>;

    /// Ok when `probe_path` on `endpoint` answers 2xx.
    async fn ensure_up(&self, endpoint: &str, probe_path: &str) -> ProviderResult<()>;

    /// Whether the live server reports no in-progress user operation.
    async fn ensure_idle(&self, endpoint: &str) -> ProviderResult<bool>;

    async fn get_user_assigned_identity(&self, server: &Server) -> ProviderResult<ManagedIdentity>;

    /// Whether `principal_id` holds the Owner role on the subscription.
    async fn is_subscription_owner(
        &self,
        principal_id: &str,
        subscription_id: &str,
    ) -> ProviderResult<bool>;
}

/// Security posture of the shared storage account.
#[async_trait]
pub trait StorageAccess: Send + Sync {
    async fn public_network_access(&self) -> ProviderResult<NetworkAccess>;

    async fn set_public_network_access(&self, access: NetworkAccess) -> ProviderResult<()>;
}
