//! Server records and their lifecycle status.
//!
//! Timestamps are RFC 3339 strings, empty when unset. They are parsed
//! where they are used (see [`parse_timestamp`]) so one malformed value
//! cannot make the whole record unreadable.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use labgrid_core::config::DefaultsConfig;

/// Lifecycle status of a user's server.
///
/// `Unregistered` is the zero value. It is what a lookup reports for a
/// user with no record and is never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    #[default]
    Unregistered,
    Registered,
    Deploying,
    Running,
    Stopping,
    Destroyed,
    AutoDestroyed,
    Failed,
    /// Provisioned, but readiness was never confirmed.
    Unknown,
}

impl ServerStatus {
    /// A deploy is already in flight or has completed.
    pub fn is_deploying_or_running(self) -> bool {
        matches!(self, ServerStatus::Deploying | ServerStatus::Running)
    }

    /// Statuses the idle sweep never touches: nothing is deployed.
    pub fn is_at_rest(self) -> bool {
        matches!(
            self,
            ServerStatus::AutoDestroyed
                | ServerStatus::Destroyed
                | ServerStatus::Unregistered
                | ServerStatus::Registered
        )
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerStatus::Unregistered => "unregistered",
            ServerStatus::Registered => "registered",
            ServerStatus::Deploying => "deploying",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Destroyed => "destroyed",
            ServerStatus::AutoDestroyed => "auto_destroyed",
            ServerStatus::Failed => "failed",
            ServerStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One user's sandbox server and its lifecycle metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Server {
    pub user_principal_id: String,
    pub user_principal_name: String,
    /// Local part of the principal name.
    pub user_alias: String,

    pub subscription_id: String,
    pub resource_group: String,
    pub region: String,

    pub managed_identity_resource_id: String,
    pub managed_identity_client_id: String,
    pub managed_identity_principal_id: String,

    pub status: ServerStatus,
    pub last_user_activity_time: String,
    pub deployed_at_time: String,
    pub destroyed_at_time: String,

    pub auto_create: bool,
    pub auto_destroy: bool,
    pub inactivity_duration_in_seconds: u64,

    pub log_level: String,
    /// Reachable `host:port`, present only while deployed.
    pub endpoint: Option<String>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            user_principal_id: String::new(),
            user_principal_name: String::new(),
            user_alias: String::new(),
            subscription_id: String::new(),
            resource_group: String::new(),
            region: String::new(),
            managed_identity_resource_id: String::new(),
            managed_identity_client_id: String::new(),
            managed_identity_principal_id: String::new(),
            status: ServerStatus::Unregistered,
            last_user_activity_time: String::new(),
            deployed_at_time: String::new(),
            destroyed_at_time: String::new(),
            auto_create: true,
            auto_destroy: true,
            inactivity_duration_in_seconds: 0,
            log_level: String::new(),
            endpoint: None,
        }
    }
}

impl Server {
    /// A fresh, not yet persisted record for a user's subscription.
    pub fn new(subscription_id: &str, user_principal_name: &str, user_principal_id: &str) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            user_principal_name: user_principal_name.to_string(),
            user_principal_id: user_principal_id.to_string(),
            user_alias: Self::alias_of(user_principal_name),
            ..Self::default()
        }
    }

    /// The synthetic record reported for a user without one.
    pub fn unregistered(user_principal_name: &str) -> Self {
        Self {
            user_principal_name: user_principal_name.to_string(),
            user_alias: Self::alias_of(user_principal_name),
            ..Self::default()
        }
    }

    /// Local part of a principal name: `alice@x.com` -> `alice`.
    pub fn alias_of(user_principal_name: &str) -> String {
        user_principal_name
            .split('@')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    /// Key in the servers table.
    pub fn table_key(&self) -> &str {
        &self.user_principal_name
    }

    pub fn has_managed_identity(&self) -> bool {
        !self.managed_identity_resource_id.is_empty()
            && !self.managed_identity_client_id.is_empty()
            && !self.managed_identity_principal_id.is_empty()
    }
}

/// Fills zero-valued fields of a record; explicit values always win.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDefaults {
    pub region: String,
    pub resource_group: String,
    pub inactivity_duration_in_seconds: u64,
    pub log_level: String,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self::from(&DefaultsConfig::default())
    }
}

impl From<&DefaultsConfig> for ServerDefaults {
    fn from(config: &DefaultsConfig) -> Self {
        Self {
            region: config.region.clone(),
            resource_group: config.resource_group.clone(),
            inactivity_duration_in_seconds: config.inactivity_duration_secs,
            log_level: config.log_level.clone(),
        }
    }
}

impl ServerDefaults {
    pub fn apply(&self, server: &mut Server) {
        if server.user_alias.is_empty() {
            server.user_alias = Server::alias_of(&server.user_principal_name);
        }
        if server.log_level.is_empty() {
            server.log_level = self.log_level.clone();
        }
        if server.region.is_empty() {
            server.region = self.region.clone();
        }
        if server.resource_group.is_empty() {
            server.resource_group = self.resource_group.clone();
        }
        if server.inactivity_duration_in_seconds == 0 {
            server.inactivity_duration_in_seconds = self.inactivity_duration_in_seconds;
        }
        if server.status == ServerStatus::Unregistered {
            server.status = ServerStatus::Registered;
        }
    }
}

/// Current time in the stored timestamp format.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|at| at.with_timezone(&Utc))
}
