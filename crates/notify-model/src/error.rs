//! Error types for the notification model
//!
//! Raised while validating identifiers and while resolving raw documents
//! into typed records.

/// Errors produced by the data model
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Identifier does not match the expected shape
    #[error("invalid notification id: {0:?}")]
    InvalidId(String),

    /// User identifier was empty
    #[error("user id must not be empty")]
    EmptyUserId,

    /// Required field missing from a document
    #[error("document {document}: missing field '{field}'")]
    MissingField {
        /// Document identifier
        document: String,
        /// Field name
        field: &'static str,
    },

    /// Discriminator field carried an unrecognized value
    #[error("unknown recipient role: {0:?}")]
    UnknownRole(String),

    /// Field present but with an unusable type or format
    #[error("document {document}: malformed field '{field}': {reason}")]
    MalformedField {
        /// Document identifier
        document: String,
        /// Field name
        field: &'static str,
        /// What was wrong
        reason: String,
    },
}

impl ModelError {
    /// Create a missing-field error
    #[inline]
    pub fn missing(document: impl Into<String>, field: &'static str) -> Self {
        Self::MissingField {
            document: document.into(),
            field,
        }
    }

    /// Create a malformed-field error
    #[inline]
    pub fn malformed(
        document: impl Into<String>,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedField {
            document: document.into(),
            field,
            reason: reason.into(),
        }
    }
}
