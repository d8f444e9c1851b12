//! Error types for object store operations.

use thiserror::Error;

use crate::types::Kind;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Store operation errors.
///
/// `NotFound` is ignorable only where the reconciler says so (probing for
/// the top-level object or for child existence); `Conflict` is retryable
/// with a bound; everything else is fatal for the pass and left to the
/// invoking scheduler to re-queue.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: Kind,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: Kind,
        namespace: String,
        name: String,
    },

    #[error("conflict writing {kind} {namespace}/{name}: stored version advanced since last read")]
    Conflict {
        kind: Kind,
        namespace: String,
        name: String,
    },

    #[error("transport failure: {reason}")]
    Transport { reason: String },
}

impl Error {
    /// Create a not-found error.
    pub fn not_found(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error.
    pub fn already_exists(
        kind: Kind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create an optimistic-concurrency conflict error.
    pub fn conflict(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Whether this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
