//! Lifecycle error types.

use thiserror::Error;

use labgrid_provider::ProviderError;
use labgrid_state::{ServerStatus, StateError};

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Required identity fields are missing. Never retried.
    #[error("invalid server: {0}")]
    Validation(String),

    /// The caller does not own the subscription, or ownership could not
    /// be established.
    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("compute provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The container group was provisioned but never answered its
    /// readiness probe. It may still exist and be billed.
    #[error("deployment for {user} not verified after {attempts} readiness probes")]
    DeployVerification { user: String, attempts: u32 },

    /// Another writer (a destroy or the idle sweep) moved the record out
    /// of `Deploying` while readiness was being confirmed.
    #[error("deployment for {user} superseded, record is now {status}")]
    Superseded { user: String, status: ServerStatus },

    #[error("no server registered for {0}")]
    NotFound(String),

    #[error("server store error: {0}")]
    State(StateError),
}

impl From<StateError> for LifecycleError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(key) => LifecycleError::NotFound(key),
            other => LifecycleError::State(other),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
