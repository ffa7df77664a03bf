use std::time::Duration;

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Failures of a provider call. None of them say anything about the
/// record in the store; callers decide what state to keep.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level failure: connect, handshake, or transport.
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    #[error("{endpoint} answered with status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("resource not found: {0}")]
    NotFound(String),

    /// The provider refused the request.
    #[error("provider rejected request: {0}")]
    Rejected(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}
