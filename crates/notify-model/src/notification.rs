//! The resolved notification record
//!
//! A [`Notification`] is what every downstream stage works with: it always
//! carries a role (legacy records are attributed one during resolution) and
//! the [`Origin`] of the sub-query that produced it.

use crate::id::{NotificationId, UserId};
use crate::role::RecipientRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Which sub-query produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Role-scoped query (`recipientId == user AND recipientRole == role`)
    RoleScoped,
    /// Unfiltered query kept only for records lacking the discriminator
    LegacyFallback,
}

impl SourceKind {
    /// Stable label for logs and cache keys
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoleScoped => "role_scoped",
            Self::LegacyFallback => "legacy_fallback",
        }
    }
}

/// Source collection and sub-query of a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    /// Sub-query kind
    pub source: SourceKind,
    /// Collection the record was read from
    pub collection: String,
}

impl Origin {
    /// Create an origin
    #[inline]
    #[must_use]
    pub fn new(source: SourceKind, collection: impl Into<String>) -> Self {
        Self {
            source,
            collection: collection.into(),
        }
    }

    /// Role-scoped origin in `collection`
    #[inline]
    #[must_use]
    pub fn role_scoped(collection: impl Into<String>) -> Self {
        Self::new(SourceKind::RoleScoped, collection)
    }

    /// Legacy-fallback origin in `collection`
    #[inline]
    #[must_use]
    pub fn legacy(collection: impl Into<String>) -> Self {
        Self::new(SourceKind::LegacyFallback, collection)
    }
}

/// Optional references to entities a notification points at
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRef {
    /// Related event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Related club
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub club_id: Option<String>,
    /// Related user (actor)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ActionRef {
    /// No references
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether any reference is set
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.event_id.is_none() && self.club_id.is_none() && self.user_id.is_none()
    }
}

/// A notification after schema resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Stable identity across sources
    pub id: NotificationId,
    /// Recipient account
    pub recipient_id: UserId,
    /// Recipient role (attributed for legacy records)
    pub recipient_role: RecipientRole,
    /// Open type tag, e.g. `event_created`
    pub kind: String,
    /// Title line
    pub title: String,
    /// Body text
    pub message: String,
    /// Server creation time
    pub created_at: DateTime<Utc>,
    /// Read flag; remote-authoritative until reconciled
    pub read: bool,
    /// Producing sub-query
    pub origin: Origin,
    /// Related entities
    #[serde(default)]
    pub action: ActionRef,
}

impl Notification {
    /// Whether this record came from the legacy fallback query
    #[inline]
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.origin.source == SourceKind::LegacyFallback
    }

    /// Copy with the read flag set
    #[inline]
    #[must_use]
    pub fn marked_read(mut self) -> Self {
        self.read = true;
        self
    }
}

/// Ordering used for every presented list: newest first, id as tie-breaker
///
/// The tie-breaker keeps lists (and anything windowed from them)
/// deterministic when timestamps collide.
#[must_use]
pub fn newest_first(a: &Notification, b: &Notification) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort a list in place with [`newest_first`]
pub fn sort_newest_first(list: &mut [Notification]) {
    list.sort_by(newest_first);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(id: &str, secs: i64) -> Notification {
        Notification {
            id: NotificationId::new(id),
            recipient_id: UserId::new("u1").unwrap(),
            recipient_role: RecipientRole::Student,
            kind: "event_created".to_string(),
            title: "t".to_string(),
            message: "m".to_string(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            read: false,
            origin: Origin::role_scoped("notifications"),
            action: ActionRef::none(),
        }
    }

    #[test]
    fn sorts_newest_first_with_id_tiebreak() {
        let mut list = vec![sample("b", 10), sample("c", 30), sample("a", 10)];
        sort_newest_first(&mut list);
        let ids: Vec<_> = list.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn legacy_detection_follows_origin() {
        let mut n = sample("a", 1);
        assert!(!n.is_legacy());
        n.origin = Origin::legacy("notifications");
        assert!(n.is_legacy());
    }

    #[test]
    fn marked_read_sets_flag() {
        assert!(sample("a", 1).marked_read().read);
    }
}
