//! Error types for keel-cluster

use thiserror::Error;

/// Control-plane error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    /// Object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Object kind
        kind: &'static str,
        /// Object name
        name: String,
    },

    /// Update carried a stale resource version
    #[error("conflict on {kind} {name}: {message}")]
    Conflict {
        /// Object kind
        kind: &'static str,
        /// Object name
        name: String,
        /// Detailed message
        message: String,
    },

    /// Create hit an existing object
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Object kind
        kind: &'static str,
        /// Object name
        name: String,
    },

    /// Object rejected by validation
    #[error("invalid object: {0}")]
    Invalid(String),

    /// Control plane unreachable or credentials rejected
    #[error("cluster unavailable: {0}")]
    Unavailable(String),
}

impl ClusterError {
    /// Build a not-found error
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Build a conflict error
    pub fn conflict(kind: &'static str, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            name: name.into(),
            message: message.into(),
        }
    }

    /// Build an already-exists error
    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Check if this is a not-found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a conflict error
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ClusterError>;

#[cfg(test)]
mod tests;
