//! Error types for permission orchestration.
//!
//! Denial and revocation are not errors: they travel as `granted = false`
//! through the normal result path. The variants here cover integration
//! mistakes and correlation anomalies only.

use thiserror::Error;

/// Errors raised by the registry, the container and the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    /// The host answered a name that has no pending request.
    #[error("No pending permission request found for '{name}'")]
    CorrelationMismatch { name: String },

    /// An operation needed the host context while the container was detached.
    #[error("The permissions container must be attached to a host context")]
    DetachedContext,

    /// A pending request already exists for this name.
    #[error("A permission request for '{name}' is already pending")]
    DuplicateRegistration { name: String },

    /// Caller-supplied input was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, PermissionError>;
