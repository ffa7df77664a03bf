//! labgrid-lifecycle: the server lifecycle state machine.
//!
//! [`ServerLifecycle`] owns every transition of a user's [`Server`]
//! record in response to API calls, and exposes the destroy path
//! ([`ServerLifecycle::tear_down`]) that the idle sweep reuses.
//!
//! Every mutating operation except activity tracking first checks that
//! the record's principal holds the Owner role on its subscription.
//!
//! [`Server`]: labgrid_state::Server

pub mod error;
pub mod lifecycle;

pub use error::{LifecycleError, LifecycleResult};
pub use lifecycle::{LifecycleConfig, ServerLifecycle};
