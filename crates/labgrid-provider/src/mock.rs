//! Scripted provider for tests.
//!
//! Answers are configured up front with the builder methods; every call
//! is counted so tests can assert on what the code under test did (or
//! did not) ask the provider to do.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use labgrid_state::Server;

use crate::error::{ProviderError, ProviderResult};
use crate::traits::{ComputeProvider, Deployment, ManagedIdentity, NetworkAccess, StorageAccess};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MockProvider {
    owner: AtomicBool,
    owner_check_fails: AtomicBool,
    /// Probes that fail before `ensure_up` succeeds; `None` = never ready.
    ready_after: Mutex<Option<u32>>,
    idle: AtomicBool,
    failing_deploys: Mutex<HashSet<String>>,
    failing_destroys: Mutex<HashSet<String>>,
    failing_idle_probes: Mutex<HashSet<String>>,
    destroy_delay: Mutex<Option<Duration>>,
    network_access: Mutex<NetworkAccess>,
    network_read_fails: AtomicBool,

    deploy_calls: AtomicU32,
    destroy_calls: AtomicU32,
    probe_calls: AtomicU32,
    idle_calls: AtomicU32,
    owner_calls: AtomicU32,
    network_updates: AtomicU32,
    destroyed: Mutex<Vec<String>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Owner of every subscription, ready on the first probe, idle.
    pub fn new() -> Self {
        Self {
            owner: AtomicBool::new(true),
            owner_check_fails: AtomicBool::new(false),
            ready_after: Mutex::new(Some(0)),
            idle: AtomicBool::new(true),
            failing_deploys: Mutex::new(HashSet::new()),
            failing_destroys: Mutex::new(HashSet::new()),
            failing_idle_probes: Mutex::new(HashSet::new()),
            destroy_delay: Mutex::new(None),
            network_access: Mutex::new(NetworkAccess::Enabled),
            network_read_fails: AtomicBool::new(false),
            deploy_calls: AtomicU32::new(0),
            destroy_calls: AtomicU32::new(0),
            probe_calls: AtomicU32::new(0),
            idle_calls: AtomicU32::new(0),
            owner_calls: AtomicU32::new(0),
            network_updates: AtomicU32::new(0),
            destroyed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_owner(self, owner: bool) -> Self {
        self.owner.store(owner, Ordering::SeqCst);
        self
    }

    /// The ownership query itself errors.
    pub fn with_failing_owner_check(self) -> Self {
        self.owner_check_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn ready_after(self, failed_probes: u32) -> Self {
        *lock(&self.ready_after) = Some(failed_probes);
        self
    }

    pub fn never_ready(self) -> Self {
        *lock(&self.ready_after) = None;
        self
    }

    pub fn with_idle(self, idle: bool) -> Self {
        self.idle.store(idle, Ordering::SeqCst);
        self
    }

    pub fn fail_deploy_for(self, user_principal_name: &str) -> Self {
        lock(&self.failing_deploys).insert(user_principal_name.to_string());
        self
    }

    pub fn fail_destroy_for(self, user_principal_name: &str) -> Self {
        lock(&self.failing_destroys).insert(user_principal_name.to_string());
        self
    }

    /// Idle probes against this endpoint error.
    pub fn fail_idle_probe_for(self, endpoint: &str) -> Self {
        lock(&self.failing_idle_probes).insert(endpoint.to_string());
        self
    }

    pub fn with_destroy_delay(self, delay: Duration) -> Self {
        *lock(&self.destroy_delay) = Some(delay);
        self
    }

    pub fn with_network_access(self, access: NetworkAccess) -> Self {
        *lock(&self.network_access) = access;
        self
    }

    pub fn with_failing_network_read(self) -> Self {
        self.network_read_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn endpoint_for(user_alias: &str) -> String {
        format!("{user_alias}.mock:8080")
    }

    pub fn deploy_calls(&self) -> u32 {
        self.deploy_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> u32 {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> u32 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn idle_calls(&self) -> u32 {
        self.idle_calls.load(Ordering::SeqCst)
    }

    pub fn owner_calls(&self) -> u32 {
        self.owner_calls.load(Ordering::SeqCst)
    }

    pub fn network_updates(&self) -> u32 {
        self.network_updates.load(Ordering::SeqCst)
    }

    /// Principal names whose container group was successfully deleted.
    pub fn destroyed(&self) -> Vec<String> {
        lock(&self.destroyed).clone()
    }

    pub fn network_access(&self) -> NetworkAccess {
        *lock(&self.network_access)
    }
}

#[async_trait]
impl ComputeProvider for MockProvider {
    async fn deploy(&self, server: &Server) -> ProviderResult<Deployment> {
        self.deploy_calls.fetch_add(1, Ordering::SeqCst);
        if lock(&self.failing_deploys).contains(&server.user_principal_name) {
            return Err(ProviderError::Rejected(format!(
                "quota exceeded for {}",
                server.user_principal_name
            )));
        }
        Ok(Deployment {
            endpoint: Self::endpoint_for(&server.user_alias),
            provisioning_state: "Succeeded".to_string(),
        })
    }

    async fn destroy(&self, server: &Server) -> ProviderResult<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.destroy_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.failing_destroys).contains(&server.user_principal_name) {
            return Err(ProviderError::Unreachable("management api".to_string()));
        }
        lock(&self.destroyed).push(server.user_principal_name.clone());
        Ok(())
    }

    async fn ensure_up(&self, endpoint: &str, probe_path: &str) -> ProviderResult<()> {
        let attempt = self.probe_calls.fetch_add(1, Ordering::SeqCst);
        match *lock(&self.ready_after) {
            Some(failures) if attempt >= failures => Ok(()),
            _ => Err(ProviderError::Status {
                endpoint: format!("{endpoint}{probe_path}"),
                status: 503,
            }),
        }
    }

    async fn ensure_idle(&self, endpoint: &str) -> ProviderResult<bool> {
        self.idle_calls.fetch_add(1, Ordering::SeqCst);
        if lock(&self.failing_idle_probes).contains(endpoint) {
            return Err(ProviderError::Unreachable(endpoint.to_string()));
        }
        Ok(self.idle.load(Ordering::SeqCst))
    }

    async fn get_user_assigned_identity(&self, server: &Server) -> ProviderResult<ManagedIdentity> {
        Ok(ManagedIdentity {
            client_id: format!("client-{}", server.user_alias),
            principal_id: format!("principal-{}", server.user_alias),
            resource_id: format!("/identities/{}", server.user_alias),
        })
    }

    async fn is_subscription_owner(
        &self,
        _principal_id: &str,
        _subscription_id: &str,
    ) -> ProviderResult<bool> {
        self.owner_calls.fetch_add(1, Ordering::SeqCst);
        if self.owner_check_fails.load(Ordering::SeqCst) {
            return Err(ProviderError::Unreachable("authorization api".to_string()));
        }
        Ok(self.owner.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl StorageAccess for MockProvider {
    async fn public_network_access(&self) -> ProviderResult<NetworkAccess> {
        if self.network_read_fails.load(Ordering::SeqCst) {
            return Err(ProviderError::Unreachable("storage api".to_string()));
        }
        Ok(*lock(&self.network_access))
    }

    async fn set_public_network_access(&self, access: NetworkAccess) -> ProviderResult<()> {
        self.network_updates.fetch_add(1, Ordering::SeqCst);
        *lock(&self.network_access) = access;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_after_counts_probes() {
        let mock = MockProvider::new().ready_after(2);
        assert!(mock.ensure_up("a", "/").await.is_err());
        assert!(mock.ensure_up("a", "/").await.is_err());
        assert!(mock.ensure_up("a", "/").await.is_ok());
        assert_eq!(mock.probe_calls(), 3);
    }

    #[tokio::test]
    async fn scripted_destroy_failure_is_per_user() {
        let mock = MockProvider::new().fail_destroy_for("bob@x.com");
        let alice = Server::new("sub-1", "alice@x.com", "oid-1");
        let bob = Server::new("sub-1", "bob@x.com", "oid-2");

        assert!(mock.destroy(&alice).await.is_ok());
        assert!(mock.destroy(&bob).await.is_err());
        assert_eq!(mock.destroyed(), vec!["alice@x.com".to_string()]);
        assert_eq!(mock.destroy_calls(), 2);
    }
}
