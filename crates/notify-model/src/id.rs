//! Identifier newtypes
//!
//! [`NotificationId`] wraps the opaque document id assigned by the remote
//! store. Ids coming from the store are authoritative and accepted as-is;
//! ids read back from local persistence go through [`NotificationId::parse`].

use crate::error::ModelError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Store auto-ids are 20 alphanumerics; custom ids may add `_` and `-`.
static ID_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$").unwrap());

/// Globally unique notification identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    /// Wrap an id issued by the remote store
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse and validate an id from an untrusted source
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidId`] if the id does not match the
    /// expected length and character class
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        if Self::is_well_formed(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ModelError::InvalidId(raw.to_string()))
        }
    }

    /// Check the identity format without allocating
    #[inline]
    #[must_use]
    pub fn is_well_formed(raw: &str) -> bool {
        ID_SHAPE.is_match(raw)
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines
    #[must_use]
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map_or(self.0.len(), |(idx, _)| idx);
        &self.0[..end]
    }
}

impl Display for NotificationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NotificationId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for NotificationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NotificationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque user (student or club account) identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user id
    ///
    /// # Errors
    /// Returns [`ModelError::EmptyUserId`] for blank input
    pub fn new(id: impl Into<String>) -> Result<Self, ModelError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ModelError::EmptyUserId);
        }
        Ok(Self(id))
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn auto_id_is_well_formed() {
        assert!(NotificationId::is_well_formed("aB3dE5fG7hJ9kL1mN3pQ"));
        assert!(NotificationId::parse("event_created-42").is_ok());
    }

    #[test]
    fn rejects_bad_shapes() {
        for raw in ["", " ", "a/b", "-leading", "with space", "é", &"x".repeat(129)] {
            assert!(
                NotificationId::parse(raw).is_err(),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn short_truncates_to_eight() {
        let id = NotificationId::new("abcdefghijkl");
        assert_eq!(id.short(), "abcdefgh");
        assert_eq!(NotificationId::new("abc").short(), "abc");
    }

    #[test]
    fn user_id_rejects_blank() {
        assert_eq!(UserId::new("  "), Err(ModelError::EmptyUserId));
        assert_eq!(UserId::new("u1").unwrap().as_str(), "u1");
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = NotificationId::new("N1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"N1\"");
    }

    proptest! {
        #[test]
        fn prop_alphanumeric_ids_accepted(raw in "[A-Za-z0-9]{1,128}") {
            prop_assert!(NotificationId::is_well_formed(&raw));
        }

        #[test]
        fn prop_ids_with_slash_rejected(prefix in "[a-z]{1,10}", suffix in "[a-z]{0,10}") {
            let raw = format!("{prefix}/{suffix}");
            prop_assert!(!NotificationId::is_well_formed(&raw));
        }
    }
}
