use gsm_credentials::CredentialStoreError;

use crate::protocol::TransportError;

/// Failures surfaced by session and registry operations.
///
/// Errors are scoped to the tenant whose operation produced them.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("tenant {0} is not connected")]
    NotConnected(String),
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("invalid tenant id `{0}`")]
    InvalidTenant(String),
    #[error("tenant {0} already exists")]
    AlreadyExists(String),
    #[error("tenant {0} not found")]
    NotFound(String),
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("credential store error: {0}")]
    Persistence(#[from] CredentialStoreError),
    #[error("tenant {0} was deleted")]
    Retired(String),
}

impl SessionError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotConnected(_) => "not_connected",
            SessionError::InvalidAddress(_) => "invalid_address",
            SessionError::InvalidTenant(_) => "invalid_tenant",
            SessionError::AlreadyExists(_) => "already_exists",
            SessionError::NotFound(_) => "not_found",
            SessionError::Timeout { .. } => "timeout",
            SessionError::Transport(_) => "transport_error",
            SessionError::Persistence(_) => "persistence_error",
            SessionError::Retired(_) => "retired",
        }
    }
}
