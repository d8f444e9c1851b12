//! Error types for the reconciler crate.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Object store operation failed.
    #[error(transparent)]
    Store(#[from] appservice_core::Error),

    /// Children exist but the last-applied snapshot is absent or does not
    /// decode. Fatal for the pass: the prior intent cannot be guessed, so
    /// the inconsistency is surfaced instead of silently re-baselined.
    #[error("malformed last-applied snapshot: {reason}")]
    MalformedSnapshot { reason: String },

    /// The current spec could not be serialized into a snapshot.
    #[error("failed to encode spec snapshot: {reason}")]
    SnapshotEncoding { reason: String },
}

impl Error {
    /// Create a malformed-snapshot error.
    pub fn malformed_snapshot(reason: impl Into<String>) -> Self {
        Self::MalformedSnapshot {
            reason: reason.into(),
        }
    }

    /// Create a snapshot-encoding error.
    pub fn snapshot_encoding(reason: impl Into<String>) -> Self {
        Self::SnapshotEncoding {
            reason: reason.into(),
        }
    }

    /// Whether this is a retryable optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_conflict())
    }
}
