//! Error types for keel-reconcile
//!
//! Every variant ends up as the message of a terminal `failed` status,
//! except `Cleanup`, which is only ever logged.

use keel_cluster::ClusterError;
use thiserror::Error;

/// Reconciliation error
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Cluster credentials or settings unusable at start
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Create or update rejected by the control plane
    #[error("conflict: {0}")]
    Conflict(String),

    /// Polling exceeded its budget
    #[error("timed out: {0}")]
    Timeout(String),

    /// Target object missing
    #[error("not found: {0}")]
    NotFound(String),

    /// Orphan removal failed
    #[error("cleanup error: {0}")]
    Cleanup(String),

    /// Any other control-plane failure
    #[error("cluster error: {0}")]
    Cluster(ClusterError),

    /// Event carried a payload this reconciler does not handle
    #[error("unexpected payload: {0}")]
    UnexpectedPayload(String),

    /// Reconciler stopped mid-pass
    #[error("reconciliation cancelled")]
    Cancelled,
}

impl From<ClusterError> for ReconcileError {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::NotFound { .. } => Self::NotFound(e.to_string()),
            ClusterError::Conflict { .. } | ClusterError::AlreadyExists { .. } => {
                Self::Conflict(e.to_string())
            }
            ClusterError::Unavailable(_) | ClusterError::Invalid(_) => Self::Cluster(e),
        }
    }
}

impl From<ReconcileError> for keel_core::Error {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::Configuration(message) => {
                keel_core::Error::configuration("kubernetes", message)
            }
            other => keel_core::Error::Reconcile(other.to_string()),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests;
