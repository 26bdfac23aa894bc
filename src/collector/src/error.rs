//! Error types for the collection core.

use thiserror::Error;

/// Failure reported by one of the external client ports.
///
/// The core never retries; transient transport errors are expected to be
/// handled (or surfaced) by the client implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("{resource} not found")]
    NotFound { resource: String },
}

impl ClientError {
    pub fn request(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Request {
            operation,
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }
}

/// Errors that abort a whole collection run.
///
/// Anything scoped to a single bucket, repository or artifact is recorded in
/// the [`ReclaimReport`](crate::report::ReclaimReport) instead.
#[derive(Debug, Error)]
pub enum GcError {
    #[error("failed to list stacks")]
    StackListing(#[source] ClientError),

    #[error("failed to fetch template for stack {stack}")]
    TemplateFetch {
        stack: String,
        #[source]
        source: ClientError,
    },

    #[error("another collection run holds the lock for {scope}")]
    LockHeld { scope: String },

    #[error("failed to acquire run lock for {scope}")]
    Lock {
        scope: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid collector configuration: {0}")]
    InvalidConfiguration(String),
}

impl GcError {
    /// Whether the error happened while building the reference corpus.
    pub fn is_inventory_failure(&self) -> bool {
        matches!(self, Self::StackListing(_) | Self::TemplateFetch { .. })
    }
}

pub type GcResult<T> = Result<T, GcError>;
