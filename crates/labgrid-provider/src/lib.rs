//! labgrid-provider: the external capabilities a server lifecycle consumes.
//!
//! ```text
//! ComputeProvider
//!   ├── deploy / destroy            container group for one user
//!   ├── ensure_up / ensure_idle     HTTP probes against the live server
//!   ├── get_user_assigned_identity  managed identity lookup
//!   └── is_subscription_owner       Owner role check
//! StorageAccess
//!   └── public network access posture (read / correct)
//! ```
//!
//! [`LocalProvider`] is the config-driven implementation `labd` runs in
//! standalone mode; [`MockProvider`] is a scripted implementation for tests.

pub mod error;
pub mod local;
pub mod mock;
pub mod probe;
pub mod traits;

pub use error::{ProviderError, ProviderResult};
pub use local::LocalProvider;
pub use mock::MockProvider;
pub use probe::{ProbeResult, check_ready, http_probe, idle_probe};
pub use traits::{ComputeProvider, Deployment, ManagedIdentity, NetworkAccess, StorageAccess};
