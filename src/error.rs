//! Error types for the dispatch engine
//!
//! All errors use the `thiserror` crate for ergonomic error handling. The
//! dispatcher deliberately does not catch listener errors: a failing listener
//! interrupts delivery and the error propagates to the caller of `dispatch`.
//!
//! Missing collaborators (container, queue resolver, transaction manager
//! resolver) are caller configuration defects and fail fast with a
//! descriptive error instead of silently skipping the listener.

use thiserror::Error;

/// Errors that can occur in the dispatch engine
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A listener reference matched none of the recognized shapes, or a
    /// class-string listener exposes neither the requested method nor the
    /// conventional invoke method.
    #[error("Unsupported listener: {0}")]
    UnsupportedListener(String),

    /// A required collaborator was not configured
    ///
    /// Raised when a class-string listener must be resolved but no container
    /// was provided, an after-commit listener is registered but no
    /// transaction manager resolver was configured, or a queueable listener
    /// fires with no queue resolver in place.
    #[error("Missing collaborator: {0} is not configured")]
    MissingCollaborator(&'static str),

    /// The container failed to resolve a class reference
    #[error("Failed to resolve `{class}`: {reason}")]
    ResolutionFailed {
        /// Class reference handed to the container
        class: String,
        /// Reason reported by the container
        reason: String,
    },

    /// A listener failed while handling an event
    ///
    /// Delivery stops at the failing listener; later listeners for the same
    /// dispatch are not invoked.
    #[error("Listener failed: {0}")]
    ListenerFailed(String),

    /// A registry lock was poisoned by a panicking thread
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Invalid listener wiring configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    ///
    /// Wraps `serde_yaml::Error` for configuration parsing failures.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_yaml::Error),

    /// IO error
    ///
    /// Wraps `std::io::Error` for configuration file reads.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;
