//! Read-state reconciliation
//!
//! The reconciled flag is `remote.read OR acknowledged`. Acknowledgments come
//! from the persisted [`AckSet`] and from a per-session set that only grows:
//! once a notification has been presented as read in this session it stays
//! read until [`ReadStateReconciler::reset`] is called for that identity.

use crate::ack::{AckSet, AckStore};
use crate::config::SyncConfig;
use crate::error::StoreError;
use crate::store::{LocalStore, Patch, RemoteStore};
use chrono::Utc;
use dashmap::DashMap;
use notify_model::{Notification, NotificationId, RecipientRole, UserId};
use std::sync::Arc;
use std::time::Duration;

/// Apply the OR policy to every item
#[must_use]
pub fn merge_read_state(list: Vec<Notification>, acks: &AckSet) -> Vec<Notification> {
    list.into_iter()
        .map(|n| if !n.read && acks.contains(&n.id) { n.marked_read() } else { n })
        .collect()
}

/// Result of marking a whole list read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkAllOutcome {
    /// Remote writes that succeeded
    pub remote_succeeded: usize,
    /// Remote writes that failed after retries
    pub remote_failed: usize,
    /// Whether the local ack set was written
    pub local_persisted: bool,
}

impl MarkAllOutcome {
    /// Whether both sides fully persisted
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.remote_failed == 0 && self.local_persisted
    }
}

type Identity = (UserId, RecipientRole);

/// Merges remote read flags with local acknowledgments
pub struct ReadStateReconciler {
    remote: Arc<dyn RemoteStore>,
    acks: AckStore,
    collection: String,
    attempts: u32,
    retry_delay: Duration,
    session: DashMap<Identity, AckSet>,
}

impl ReadStateReconciler {
    /// Create from configuration
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, local: Arc<dyn LocalStore>, config: &SyncConfig) -> Self {
        Self {
            remote,
            acks: AckStore::from_config(local, config),
            collection: config.collection.clone(),
            attempts: config.mark_read_attempts.max(1),
            retry_delay: config.mark_read_retry_delay(),
            session: DashMap::new(),
        }
    }

    /// Underlying ack store
    #[inline]
    #[must_use]
    pub fn acks(&self) -> &AckStore {
        &self.acks
    }

    /// Ids presented as read during this session
    #[must_use]
    pub fn session_acks(&self, user: &UserId, role: RecipientRole) -> AckSet {
        self.session
            .get(&(user.clone(), role))
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// Record ids as read for the rest of the session
    pub fn remember_read(
        &self,
        user: &UserId,
        role: RecipientRole,
        ids: impl IntoIterator<Item = NotificationId>,
    ) {
        let mut ids = ids.into_iter().peekable();
        if ids.peek().is_none() {
            return;
        }
        self.session.entry((user.clone(), role)).or_default().extend(ids);
    }

    /// Persisted acks plus session acks
    pub async fn effective_acks(&self, user: &UserId, role: RecipientRole) -> AckSet {
        let persisted = self.acks.load(user, role).await;
        persisted.union(&self.session_acks(user, role))
    }

    /// Reconcile a fetched list
    pub async fn reconcile(
        &self,
        list: Vec<Notification>,
        user: &UserId,
        role: RecipientRole,
    ) -> Vec<Notification> {
        let acks = self.effective_acks(user, role).await;
        let merged = merge_read_state(list, &acks);
        self.remember_read(user, role, read_ids(&merged));
        merged
    }

    /// Reconcile against the session set only, without touching the local store
    #[must_use]
    pub fn reconcile_with_session(
        &self,
        list: Vec<Notification>,
        user: &UserId,
        role: RecipientRole,
    ) -> Vec<Notification> {
        merge_read_state(list, &self.session_acks(user, role))
    }

    /// Mark one notification read
    ///
    /// The remote flag update (with bounded retries) and the local ack insert
    /// run independently. Returns `true` if either side persisted. The id is
    /// read for the rest of the session in every case.
    pub async fn mark_read(&self, id: &NotificationId, user: &UserId, role: RecipientRole) -> bool {
        self.remember_read(user, role, [id.clone()]);

        let (remote, local) = tokio::join!(
            self.write_remote(id),
            self.acks.insert(user, role, id.clone())
        );

        let remote_ok = match remote {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "remote mark-read failed, relying on local ack");
                false
            }
        };
        let local_ok = match local {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "local ack insert failed");
                false
            }
        };
        tracing::debug!(id = %id, user = %user, role = %role, remote_ok, local_ok, "marked read");
        remote_ok || local_ok
    }

    /// Mark every unread item of `list` read
    pub async fn mark_all_read(
        &self,
        list: &[Notification],
        user: &UserId,
        role: RecipientRole,
    ) -> MarkAllOutcome {
        let unread: Vec<NotificationId> = list.iter().filter(|n| !n.read).map(|n| n.id.clone()).collect();
        if unread.is_empty() {
            return MarkAllOutcome {
                local_persisted: true,
                ..MarkAllOutcome::default()
            };
        }
        self.remember_read(user, role, unread.iter().cloned());

        let remote_writes = futures::future::join_all(unread.iter().map(|id| self.write_remote(id)));
        let (results, local) = tokio::join!(
            remote_writes,
            self.acks.insert_many(user, role, unread.clone())
        );

        let remote_succeeded = results.iter().filter(|r| r.is_ok()).count();
        let outcome = MarkAllOutcome {
            remote_succeeded,
            remote_failed: results.len() - remote_succeeded,
            local_persisted: match local {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(user = %user, error = %e, "local ack insert failed");
                    false
                }
            },
        };
        tracing::info!(
            user = %user,
            role = %role,
            succeeded = outcome.remote_succeeded,
            failed = outcome.remote_failed,
            local = outcome.local_persisted,
            "marked all read"
        );
        outcome
    }

    /// Forget the session read set for `(user, role)`
    pub fn reset(&self, user: &UserId, role: RecipientRole) {
        self.session.remove(&(user.clone(), role));
    }

    async fn write_remote(&self, id: &NotificationId) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self
                .remote
                .update(&self.collection, id, Patch::mark_read(Utc::now()))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    tracing::debug!(id = %id, attempt, error = %e, "retrying mark-read");
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for ReadStateReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadStateReconciler")
            .field("collection", &self.collection)
            .field("attempts", &self.attempts)
            .field("sessions", &self.session.len())
            .finish_non_exhaustive()
    }
}

/// Ids of items currently marked read
pub fn read_ids(list: &[Notification]) -> impl Iterator<Item = NotificationId> + '_ {
    list.iter().filter(|n| n.read).map(|n| n.id.clone())
}
