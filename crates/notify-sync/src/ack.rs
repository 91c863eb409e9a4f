//! Persisted read-acknowledgment sets
//!
//! One set per `(user, role)`, stored in the [`LocalStore`] as a JSON array of
//! notification ids under `{prefix}_{user}` (students) or
//! `{prefix}_{user}_club` (clubs).
//!
//! Loading applies hygiene: entries that are not strings or do not have the
//! shape of a notification id are malformed. When malformed entries make up
//! strictly more than the configured ratio of the set, the whole set is
//! dropped; otherwise they are purged and the cleaned set is written back.

use crate::config::SyncConfig;
use crate::error::{LocalStoreError, SyncError};
use crate::store::LocalStore;
use indexmap::IndexSet;
use notify_model::{NotificationId, RecipientRole, UserId};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Set of notification ids the device believes are read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckSet(IndexSet<NotificationId>);

impl AckSet {
    /// Empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is acknowledged
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &NotificationId) -> bool {
        self.0.contains(id)
    }

    /// Add an id; returns `false` if it was already present
    #[inline]
    pub fn insert(&mut self, id: NotificationId) -> bool {
        self.0.insert(id)
    }

    /// Add every id from `other`
    pub fn merge(&mut self, other: &AckSet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Copy holding the ids of both sets
    #[must_use]
    pub fn union(&self, other: &AckSet) -> AckSet {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Number of ids
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ids in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &NotificationId> {
        self.0.iter()
    }

    /// Persisted form
    ///
    /// # Errors
    /// Returns [`SyncError::Serialization`] if encoding fails
    pub fn to_json(&self) -> Result<String, SyncError> {
        let ids: Vec<&str> = self.0.iter().map(NotificationId::as_str).collect();
        Ok(serde_json::to_string(&ids)?)
    }
}

impl FromIterator<NotificationId> for AckSet {
    fn from_iter<I: IntoIterator<Item = NotificationId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<NotificationId> for AckSet {
    fn extend<I: IntoIterator<Item = NotificationId>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for AckSet {
    type Item = NotificationId;
    type IntoIter = indexmap::set::IntoIter<NotificationId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Result of inspecting a persisted value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    /// Well-formed ids
    pub valid: AckSet,
    /// Entries seen (an unparseable value counts as one)
    pub total: usize,
    /// Entries rejected
    pub malformed: usize,
}

impl Inspection {
    /// Whether malformed entries exceed `ratio` of the total
    #[must_use]
    pub fn exceeds(&self, ratio: f64) -> bool {
        if self.total == 0 {
            return false;
        }
        #[allow(clippy::cast_precision_loss)]
        let share = self.malformed as f64 / self.total as f64;
        share > ratio
    }
}

/// Classify every entry of a persisted ack value
#[must_use]
pub fn inspect(raw: &str) -> Inspection {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => {
            let total = items.len();
            let mut valid = AckSet::new();
            let mut malformed = 0;
            for item in items {
                match item.as_str().map(NotificationId::parse) {
                    Some(Ok(id)) => {
                        valid.insert(id);
                    }
                    _ => malformed += 1,
                }
            }
            Inspection {
                valid,
                total,
                malformed,
            }
        }
        _ => Inspection {
            valid: AckSet::new(),
            total: 1,
            malformed: 1,
        },
    }
}

/// What hygiene did on load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hygiene {
    /// Nothing persisted
    Missing,
    /// Every entry valid
    Clean,
    /// Malformed entries removed, cleaned set written back
    Purged {
        /// Entries removed
        removed: usize,
    },
    /// Majority malformed, whole set dropped
    Reset {
        /// Malformed entries found
        malformed: usize,
        /// Entries found
        total: usize,
    },
    /// Local store read failed; treated as empty
    Unreadable,
}

/// A loaded ack set plus what hygiene did to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckLoad {
    /// Usable ids
    pub set: AckSet,
    /// Hygiene outcome
    pub hygiene: Hygiene,
}

/// Storage key for one identity's ack set
#[must_use]
pub fn ack_key(prefix: &str, user: &UserId, role: RecipientRole) -> String {
    match role {
        RecipientRole::Student => format!("{prefix}_{user}"),
        RecipientRole::Club => format!("{prefix}_{user}_club"),
    }
}

/// Ack sets persisted in a [`LocalStore`]
///
/// Every operation that may write runs under one async lock, so concurrent
/// inserts never lose each other's ids.
pub struct AckStore {
    local: Arc<dyn LocalStore>,
    prefix: String,
    reset_ratio: f64,
    lock: Mutex<()>,
}

impl AckStore {
    /// Create a store
    #[must_use]
    pub fn new(local: Arc<dyn LocalStore>, prefix: impl Into<String>, reset_ratio: f64) -> Self {
        Self {
            local,
            prefix: prefix.into(),
            reset_ratio,
            lock: Mutex::new(()),
        }
    }

    /// Create from configuration
    #[must_use]
    pub fn from_config(local: Arc<dyn LocalStore>, config: &SyncConfig) -> Self {
        Self::new(local, config.ack_key_prefix.clone(), config.malformed_reset_ratio)
    }

    /// Storage key for `(user, role)`
    #[inline]
    #[must_use]
    pub fn key(&self, user: &UserId, role: RecipientRole) -> String {
        ack_key(&self.prefix, user, role)
    }

    /// Load with hygiene; local failures degrade to an empty set
    pub async fn load(&self, user: &UserId, role: RecipientRole) -> AckSet {
        self.load_report(user, role).await.set
    }

    /// Load with hygiene and report what was done
    pub async fn load_report(&self, user: &UserId, role: RecipientRole) -> AckLoad {
        let _guard = self.lock.lock().await;
        let key = self.key(user, role);
        match self.read_clean(&key).await {
            Ok(load) => load,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "ack set unreadable, using empty set");
                AckLoad {
                    set: AckSet::new(),
                    hygiene: Hygiene::Unreadable,
                }
            }
        }
    }

    /// Add one id
    ///
    /// # Errors
    /// Returns [`SyncError::Local`] if the set cannot be read or written
    pub async fn insert(
        &self,
        user: &UserId,
        role: RecipientRole,
        id: NotificationId,
    ) -> Result<bool, SyncError> {
        Ok(self.insert_many(user, role, std::iter::once(id)).await? > 0)
    }

    /// Add many ids; returns how many were new
    ///
    /// # Errors
    /// Returns [`SyncError::Local`] if the set cannot be read or written
    pub async fn insert_many(
        &self,
        user: &UserId,
        role: RecipientRole,
        ids: impl IntoIterator<Item = NotificationId> + Send,
    ) -> Result<usize, SyncError> {
        let _guard = self.lock.lock().await;
        let key = self.key(user, role);
        let mut set = self.read_clean(&key).await?.set;

        let added = ids.into_iter().filter(|id| set.insert(id.clone())).count();
        if added > 0 {
            self.local.set(&key, set.to_json()?).await?;
            tracing::debug!(key = %key, added, size = set.len(), "ack set updated");
        }
        Ok(added)
    }

    /// Drop the set for `(user, role)`
    ///
    /// # Errors
    /// Returns [`SyncError::Local`] if removal fails
    pub async fn clear(&self, user: &UserId, role: RecipientRole) -> Result<(), SyncError> {
        let _guard = self.lock.lock().await;
        let key = self.key(user, role);
        self.local.remove(&key).await?;
        tracing::info!(key = %key, "ack set cleared");
        Ok(())
    }

    async fn read_clean(&self, key: &str) -> Result<AckLoad, LocalStoreError> {
        let Some(raw) = self.local.get(key).await? else {
            return Ok(AckLoad {
                set: AckSet::new(),
                hygiene: Hygiene::Missing,
            });
        };

        let inspection = inspect(&raw);
        if inspection.malformed == 0 {
            return Ok(AckLoad {
                set: inspection.valid,
                hygiene: Hygiene::Clean,
            });
        }

        if inspection.exceeds(self.reset_ratio) {
            tracing::warn!(
                key,
                malformed = inspection.malformed,
                total = inspection.total,
                "ack set mostly malformed, resetting"
            );
            if let Err(e) = self.local.remove(key).await {
                tracing::warn!(key, error = %e, "failed to remove corrupted ack set");
            }
            return Ok(AckLoad {
                set: AckSet::new(),
                hygiene: Hygiene::Reset {
                    malformed: inspection.malformed,
                    total: inspection.total,
                },
            });
        }

        tracing::info!(key, removed = inspection.malformed, "purging malformed ack entries");
        match inspection.valid.to_json() {
            Ok(cleaned) => {
                if let Err(e) = self.local.set(key, cleaned).await {
                    tracing::warn!(key, error = %e, "failed to write back purged ack set");
                }
            }
            Err(e) => tracing::warn!(key, error = %e, "failed to encode purged ack set"),
        }
        Ok(AckLoad {
            set: inspection.valid,
            hygiene: Hygiene::Purged {
                removed: inspection.malformed,
            },
        })
    }
}

impl std::fmt::Debug for AckStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckStore")
            .field("prefix", &self.prefix)
            .field("reset_ratio", &self.reset_ratio)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLocalStore;
    use crate::store::MockLocalStore;
    use pretty_assertions::assert_eq;

    fn user() -> UserId {
        UserId::new("u1").unwrap()
    }

    fn store(local: &InMemoryLocalStore) -> AckStore {
        AckStore::new(Arc::new(local.clone()), "readNotifications", 0.5)
    }

    #[test]
    fn keys_follow_role() {
        assert_eq!(ack_key("readNotifications", &user(), RecipientRole::Student), "readNotifications_u1");
        assert_eq!(ack_key("readNotifications", &user(), RecipientRole::Club), "readNotifications_u1_club");
    }

    #[test]
    fn inspect_classifies_entries() {
        let i = inspect(r#"["N1", 3, "bad id", null, "N2"]"#);
        assert_eq!(i.total, 5);
        assert_eq!(i.malformed, 3);
        assert_eq!(i.valid.len(), 2);

        let garbage = inspect("{not json");
        assert_eq!((garbage.total, garbage.malformed), (1, 1));
        assert!(garbage.exceeds(0.5));
    }

    #[test]
    fn exactly_half_malformed_does_not_exceed() {
        let i = Inspection {
            valid: AckSet::new(),
            total: 10,
            malformed: 5,
        };
        assert!(!i.exceeds(0.5));
    }

    #[tokio::test]
    async fn majority_malformed_resets_whole_set() {
        let local = InMemoryLocalStore::new();
        local.seed(
            "readNotifications_u1_club",
            r#"["N1","N2","N3","N4","bad/1","bad/2","bad/3","",7,false]"#,
        );
        let acks = store(&local);

        let load = acks.load_report(&user(), RecipientRole::Club).await;
        assert_eq!(load.set.len(), 0);
        assert_eq!(load.hygiene, Hygiene::Reset { malformed: 6, total: 10 });
        assert_eq!(local.peek("readNotifications_u1_club"), None);
    }

    #[tokio::test]
    async fn minority_malformed_is_purged_and_written_back() {
        let local = InMemoryLocalStore::new();
        local.seed("readNotifications_u1", r#"["N1","N2","N3","bad/1"]"#);
        let acks = store(&local);

        let load = acks.load_report(&user(), RecipientRole::Student).await;
        assert_eq!(load.hygiene, Hygiene::Purged { removed: 1 });
        assert_eq!(load.set.len(), 3);
        assert_eq!(local.peek("readNotifications_u1").as_deref(), Some(r#"["N1","N2","N3"]"#));
    }

    #[tokio::test]
    async fn insert_persists_and_deduplicates() {
        let local = InMemoryLocalStore::new();
        let acks = store(&local);

        assert!(acks.insert(&user(), RecipientRole::Student, NotificationId::new("N1")).await.unwrap());
        assert!(!acks.insert(&user(), RecipientRole::Student, NotificationId::new("N1")).await.unwrap());
        let added = acks
            .insert_many(
                &user(),
                RecipientRole::Student,
                ["N2", "N3"].map(NotificationId::new),
            )
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(acks.load(&user(), RecipientRole::Student).await.len(), 3);
        // role-scoped keys do not collide
        assert!(acks.load(&user(), RecipientRole::Club).await.is_empty());
    }

    #[tokio::test]
    async fn unreadable_store_degrades_to_empty() {
        let mut local = MockLocalStore::new();
        local
            .expect_get()
            .returning(|_| Err(LocalStoreError::Unavailable("locked".into())));
        let acks = AckStore::new(Arc::new(local), "readNotifications", 0.5);

        let load = acks.load_report(&user(), RecipientRole::Student).await;
        assert_eq!(load.hygiene, Hygiene::Unreadable);
        assert!(load.set.is_empty());

        let err = acks
            .insert(&user(), RecipientRole::Student, NotificationId::new("N1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Local(_)));
    }

    #[tokio::test]
    async fn clear_removes_key() {
        let local = InMemoryLocalStore::new();
        local.seed("readNotifications_u1", r#"["N1"]"#);
        let acks = store(&local);
        acks.clear(&user(), RecipientRole::Student).await.unwrap();
        assert!(local.is_empty());
    }
}
