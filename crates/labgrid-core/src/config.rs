//! labd.toml configuration parser.
//!
//! Every section is optional. Missing keys fall back to the defaults
//! below; duration-valued keys are kept as strings and resolved with
//! [`parse_duration`] so the file stays readable ("5s", "3m").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LabConfig {
    pub server: ServerConfig,
    pub deploy: DeployConfig,
    pub reconcile: ReconcileConfig,
    pub defaults: DefaultsConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            data_dir: PathBuf::from("/var/lib/labgrid"),
        }
    }
}

/// Readiness polling performed by a deploy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeployConfig {
    /// HTTP path probed on the server endpoint.
    pub probe_path: String,
    pub probe_interval: String,
    pub probe_timeout: String,
    /// Total time a deploy waits for readiness before giving up.
    pub wait_budget: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            probe_path: "/".to_string(),
            probe_interval: "5s".to_string(),
            probe_timeout: "2s".to_string(),
            wait_budget: "180s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    pub auto_destroy_interval: String,
    pub auto_remediate_interval: String,
    /// Restarts a supervised loop is allowed before it stops for good.
    pub retry_budget: u32,
    pub restart_delay: String,
    /// Upper bound on a single compute provider call made by a reconciler.
    pub provider_timeout: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            auto_destroy_interval: "60s".to_string(),
            auto_remediate_interval: "300s".to_string(),
            retry_budget: 3,
            restart_delay: "5s".to_string(),
            provider_timeout: "30s".to_string(),
        }
    }
}

/// Values filled into server records that leave them unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DefaultsConfig {
    pub region: String,
    pub resource_group: String,
    pub inactivity_duration_secs: u64,
    pub log_level: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            region: "East US".to_string(),
            resource_group: "repro-project".to_string(),
            inactivity_duration_secs: 3600,
            log_level: "0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Address of a deployed server; `{alias}` is replaced with the user alias.
    pub endpoint_template: String,
    /// Path answering `{"idle": bool}` on a live server.
    pub idle_path: String,
    /// subscription id -> principal ids holding the Owner role.
    pub owners: HashMap<String, Vec<String>>,
    pub storage_account: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint_template: "{alias}.labs.internal:8080".to_string(),
            idle_path: "/status".to_string(),
            owners: HashMap::new(),
            storage_account: "labgridstorage".to_string(),
        }
    }
}

impl LabConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: LabConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values that would only fail later, deep inside a loop.
    pub fn validate(&self) -> anyhow::Result<()> {
        let durations = [
            ("deploy.probe_interval", &self.deploy.probe_interval),
            ("deploy.probe_timeout", &self.deploy.probe_timeout),
            ("deploy.wait_budget", &self.deploy.wait_budget),
            ("reconcile.auto_destroy_interval", &self.reconcile.auto_destroy_interval),
            ("reconcile.auto_remediate_interval", &self.reconcile.auto_remediate_interval),
            ("reconcile.restart_delay", &self.reconcile.restart_delay),
            ("reconcile.provider_timeout", &self.reconcile.provider_timeout),
        ];
        for (key, value) in durations {
            let parsed = parse_duration(value).with_context(|| format!("config key {key}"))?;
            if parsed.is_zero() && key != "reconcile.restart_delay" {
                anyhow::bail!("config key {key} must be greater than zero");
            }
        }
        if !self.deploy.probe_path.starts_with('/') {
            anyhow::bail!("deploy.probe_path must start with '/'");
        }
        if !self.provider.idle_path.starts_with('/') {
            anyhow::bail!("provider.idle_path must start with '/'");
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        duration_or(&self.deploy.probe_interval, Duration::from_secs(5))
    }

    pub fn probe_timeout(&self) -> Duration {
        duration_or(&self.deploy.probe_timeout, Duration::from_secs(2))
    }

    pub fn wait_budget(&self) -> Duration {
        duration_or(&self.deploy.wait_budget, Duration::from_secs(180))
    }

    pub fn auto_destroy_interval(&self) -> Duration {
        duration_or(&self.reconcile.auto_destroy_interval, Duration::from_secs(60))
    }

    pub fn auto_remediate_interval(&self) -> Duration {
        duration_or(&self.reconcile.auto_remediate_interval, Duration::from_secs(300))
    }

    pub fn restart_delay(&self) -> Duration {
        duration_or(&self.reconcile.restart_delay, Duration::from_secs(5))
    }

    pub fn provider_timeout(&self) -> Duration {
        duration_or(&self.reconcile.provider_timeout, Duration::from_secs(30))
    }
}

// Only reached for configs built in code; files go through `validate`.
fn duration_or(value: &str, fallback: Duration) -> Duration {
    parse_duration(value).unwrap_or(fallback)
}
