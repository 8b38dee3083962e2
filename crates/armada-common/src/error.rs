//! Error types for the Armada operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants carry the resource or operation they relate to so that status
//! conditions and events can show a useful message.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Armada operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A resource or release that was expected to exist is gone
    ///
    /// Covers both Kubernetes 404s and Helm reporting no deployed release.
    /// Most callers treat this as benign (e.g. uninstalling something
    /// already removed).
    #[error("release not found")]
    NotFound,

    /// Validation error for CRD specs
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// A helm invocation failed
    #[error("helm {operation} failed for {release}: {message}")]
    Helm {
        /// Helm subcommand (install, upgrade, uninstall, ...)
        operation: String,
        /// Release the command targeted
        release: String,
        /// Captured stderr or spawn error
        message: String,
    },

    /// A chart source could not be resolved to a local path
    #[error("chart source error [{location}]: {message}")]
    Source {
        /// Source location (URL or path)
        location: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// The request was cancelled before it completed
    #[error("operation cancelled: {operation}")]
    Cancelled {
        /// Operation that was interrupted
        operation: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a named resource
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a helm error for a release operation
    pub fn helm(
        operation: impl Into<String>,
        release: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Helm {
            operation: operation.into(),
            release: release.into(),
            message: msg.into(),
        }
    }

    /// Create a chart source error for a location
    pub fn source_for(location: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Source {
            location: location.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True for the not-found sentinel and Kubernetes 404 responses
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Collapse a Kubernetes 404 into the [`Error::NotFound`] sentinel
    pub fn normalize_not_found(self) -> Self {
        if self.is_not_found() {
            Error::NotFound
        } else {
            self
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec fix. Kubernetes
    /// errors are retryable unless the API server rejected the request.
    /// Conflicts are retried on the next reconcile.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::NotFound => true,
            Error::Validation { .. } => false,
            Error::Helm { .. } => true,
            Error::Source { .. } => true,
            Error::Serialization { .. } => false,
            Error::Cancelled { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::Helm { operation, .. } => Some(operation),
            _ => None,
        }
    }
}
