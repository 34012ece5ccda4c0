//! Error types for registry operations

use thiserror::Error;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur during registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Registration payload failed validation and was not applied
    #[error("Invalid registration: {reason}")]
    Validation { reason: String },

    /// Operation referenced an agent id the store has never seen
    #[error("Agent not found: {agent_id}")]
    NotFound { agent_id: String },

    /// Concurrent full registrations raced on the same agent id
    #[error("Conflicting write for agent {agent_id}: expected version {expected}, found {actual}")]
    Conflict {
        agent_id: String,
        expected: u64,
        actual: u64,
    },

    /// Store backend failure
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    /// Payload serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    /// Create a validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(agent_id: impl Into<String>) -> Self {
        Self::NotFound {
            agent_id: agent_id.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Check if this error is retryable from the caller's side
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::Unavailable { .. })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        RegistryError::Unavailable {
            reason: err.to_string(),
        }
    }
}
