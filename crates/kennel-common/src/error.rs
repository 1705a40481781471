//! Common error types for Kennel.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`KennelError`].
pub type KennelResult<T> = Result<T, KennelError>;

/// Errors returned by the Kennel runtime.
///
/// The variants follow the lifecycle: validation errors happen before any
/// resource exists, configuration errors while a runtime directory is being
/// populated, supervision errors while the monitor is started, and state
/// errors when an operation is not permitted by the observed status.
#[derive(Error, Diagnostic, Debug)]
pub enum KennelError {
    /// Container not found.
    #[error("Container not found: {id}")]
    #[diagnostic(code(kennel::container::not_found))]
    ContainerNotFound {
        /// The container ID that was not found.
        id: String,
    },

    /// A runtime directory for the container already exists.
    #[error("Container already exists: {id}")]
    #[diagnostic(
        code(kennel::container::already_exists),
        help("Delete the existing container first or choose another ID")
    )]
    AlreadyExists {
        /// The conflicting container ID.
        id: String,
    },

    /// Invalid container ID format.
    #[error("Invalid container ID: {id:?}")]
    #[diagnostic(
        code(kennel::container::invalid_id),
        help("Container IDs must be alphanumeric with hyphens and underscores, 1-64 characters")
    )]
    InvalidContainerId {
        /// The invalid container ID.
        id: String,
    },

    /// The bundle spec was rejected.
    #[error("Invalid container spec: {message}")]
    #[diagnostic(code(kennel::validation))]
    Validation {
        /// The error message.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(
        code(kennel::config),
        help("The runtime directory is left in place, run `kennel delete` to remove it")
    )]
    Config {
        /// The error message.
        message: String,
    },

    /// The monitor process could not be started or supervised.
    #[error("Supervision error: {message}")]
    #[diagnostic(code(kennel::supervision))]
    Supervision {
        /// The error message.
        message: String,
    },

    /// An operation did not finish before its deadline.
    #[error("Timed out: {operation}")]
    #[diagnostic(code(kennel::timeout))]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// The operation is not permitted in the current container state.
    #[error("Invalid state for container {id}: {message}")]
    #[diagnostic(code(kennel::container::invalid_state))]
    InvalidState {
        /// The container ID.
        id: String,
        /// What was expected and what was observed.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(kennel::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(kennel::serialization))]
    Serialization(String),

    /// Permission denied.
    #[error("Permission denied: {operation}")]
    #[diagnostic(
        code(kennel::permission_denied),
        help("Try running with elevated privileges (sudo)")
    )]
    PermissionDenied {
        /// The operation that was denied.
        operation: String,
    },

    /// A broken invariant inside the runtime.
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(kennel::internal),
        help("This is a bug, please report it at https://github.com/kennel-runtime/kennel/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl KennelError {
    /// Shorthand for [`KennelError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for [`KennelError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Shorthand for [`KennelError::Supervision`].
    pub fn supervision(message: impl Into<String>) -> Self {
        Self::Supervision {
            message: message.into(),
        }
    }

    /// Shorthand for [`KennelError::Timeout`].
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Returns true for the "never existed" sentinel.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ContainerNotFound { .. })
    }
}

impl From<serde_json::Error> for KennelError {
    fn from(err: serde_json::Error) -> Self {
        KennelError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = KennelError::ContainerNotFound {
            id: "abc123".to_string(),
        };
        assert_eq!(err.to_string(), "Container not found: abc123");
        assert!(err.is_not_found());
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KennelError = io_err.into();
        assert!(matches!(err, KennelError::Io(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn invalid_state_display() {
        let err = KennelError::InvalidState {
            id: "c1".to_string(),
            message: "expected created, but was running".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state for container c1: expected created, but was running"
        );
    }
}
