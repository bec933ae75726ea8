//! Error types for keel-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// A reconciler could not be started with the given configuration
    #[error("configuration error in {reconciler}: {message}")]
    Configuration {
        /// Reconciler name
        reconciler: String,
        /// Detailed message
        message: String,
    },

    /// No reconciler registered under this name
    #[error("unknown reconciler: {0}")]
    UnknownReconciler(String),

    /// A reconciler with this name is already registered
    #[error("reconciler already registered: {0}")]
    DuplicateReconciler(String),

    /// The bus queue has been closed (bus stopped)
    #[error("event bus is closed")]
    BusClosed,

    /// The bus queue is at capacity (only from non-blocking publish)
    #[error("event bus is full")]
    BusFull,

    /// Work queue backend failure
    #[error("work queue error: {0}")]
    Queue(String),

    /// Event (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A reconciler failed to process an event
    #[error("reconcile error: {0}")]
    Reconcile(String),
}

impl Error {
    /// Build a configuration error for a named reconciler
    pub fn configuration(reconciler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            reconciler: reconciler.into(),
            message: message.into(),
        }
    }

    /// Whether this error should abort startup
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::UnknownReconciler(_) | Self::DuplicateReconciler(_)
        )
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Self::Queue(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests;
