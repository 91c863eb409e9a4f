//! Error types for the synchronization engine
//!
//! Remote failures carry a machine-readable [`StoreErrorCode`] so each
//! pipeline stage can apply its own policy:
//! - `PermissionDenied`: swallowed per sub-query
//! - `IndexBuilding`: retried without the ordering clause
//! - `Unavailable`: cached data is served and marked stale

use notify_model::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable remote error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreErrorCode {
    /// Caller may not read or write the target
    PermissionDenied,
    /// Composite index missing or still building (failed-precondition)
    IndexBuilding,
    /// Backend unreachable
    Unavailable,
    /// Target document does not exist
    NotFound,
    /// Remote deadline exceeded
    DeadlineExceeded,
    /// Anything else
    Internal,
}

impl StoreErrorCode {
    /// Wire-style label
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission-denied",
            Self::IndexBuilding => "failed-precondition",
            Self::Unavailable => "unavailable",
            Self::NotFound => "not-found",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by the remote document store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StoreError {
    /// Error code
    pub code: StoreErrorCode,
    /// Human-readable detail
    pub message: String,
}

impl StoreError {
    /// Create an error with an explicit code
    #[inline]
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Permission denied
    #[inline]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::PermissionDenied, message)
    }

    /// Composite index still building
    #[inline]
    pub fn index_building(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::IndexBuilding, message)
    }

    /// Backend unavailable
    #[inline]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::Unavailable, message)
    }

    /// Document not found
    #[inline]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::NotFound, message)
    }

    /// Deadline exceeded
    #[inline]
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::DeadlineExceeded, message)
    }

    /// Internal failure
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::Internal, message)
    }

    /// Check if a retry may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            StoreErrorCode::Unavailable | StoreErrorCode::DeadlineExceeded | StoreErrorCode::Internal
        )
    }

    /// Check for a permission error
    #[inline]
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        self.code == StoreErrorCode::PermissionDenied
    }

    /// Check for a missing/building index
    #[inline]
    #[must_use]
    pub fn is_index_building(&self) -> bool {
        self.code == StoreErrorCode::IndexBuilding
    }
}

/// Local key-value store errors
#[derive(Debug, thiserror::Error)]
pub enum LocalStoreError {
    /// Filesystem failure
    #[error("local store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted document could not be (de)serialized
    #[error("local store encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Store refused the operation
    #[error("local store unavailable: {0}")]
    Unavailable(String),
}

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Remote store failure
    #[error("remote store error: {0}")]
    Store(#[from] StoreError),

    /// Record could not be resolved
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Local store failure
    #[error(transparent)]
    Local(#[from] LocalStoreError),

    /// Serialization failure
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blocking operation exceeded its bound
    #[error("operation timed out after {after_ms}ms")]
    Timeout {
        /// Bound that was exceeded
        after_ms: u64,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Feed was closed or its center dropped
    #[error("feed closed")]
    FeedClosed,
}

impl SyncError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Timeout { .. } => true,
            Self::Local(LocalStoreError::Io(_)) => true,
            _ => false,
        }
    }
}
