//! Unread counting shared by the badge and the list screen
//!
//! Both call sites go through [`UnreadCounter::view`], which runs the same
//! aggregate, reconcile and count steps; only the window differs. The
//! aggregator reads the same scan for every window and cuts the window after
//! filtering and ordering by `(createdAt desc, id)`, so the badge window is
//! a prefix of the list window: the badge equals the unread count of the
//! list's leading `badge_limit` items, and the whole list's unread count
//! whenever those fit in the badge window.

use crate::aggregator::Aggregator;
use crate::config::SyncConfig;
use crate::feed::FeedView;
use crate::reconciler::ReadStateReconciler;
use notify_model::{Notification, RecipientRole, UserId};
use std::sync::Arc;

/// Items with `read == false`
#[inline]
#[must_use]
pub fn count_unread(list: &[Notification]) -> usize {
    list.iter().filter(|n| !n.read).count()
}

/// Aggregate, reconcile, count
#[derive(Debug, Clone)]
pub struct UnreadCounter {
    aggregator: Arc<Aggregator>,
    reconciler: Arc<ReadStateReconciler>,
    list_limit: usize,
    badge_limit: usize,
}

impl UnreadCounter {
    /// Create over a shared pipeline
    #[must_use]
    pub fn new(
        aggregator: Arc<Aggregator>,
        reconciler: Arc<ReadStateReconciler>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            aggregator,
            reconciler,
            list_limit: config.list_limit,
            badge_limit: config.badge_limit,
        }
    }

    /// Reconciled view over a `limit`-sized window
    pub async fn view(&self, user: &UserId, role: RecipientRole, limit: usize) -> FeedView {
        let outcome = self.aggregator.fetch_with_limit(user, role, limit).await;
        let list = self.reconciler.reconcile(outcome.notifications, user, role).await;
        FeedView::new(list, outcome.stale)
    }

    /// List-screen view
    pub async fn list(&self, user: &UserId, role: RecipientRole) -> FeedView {
        self.view(user, role, self.list_limit).await
    }

    /// Badge count
    pub async fn badge(&self, user: &UserId, role: RecipientRole) -> usize {
        let view = self.view(user, role, self.badge_limit).await;
        tracing::trace!(user = %user, role = %role, unread = view.unread, "badge counted");
        view.unread
    }

    /// Window used by [`Self::list`]
    #[inline]
    #[must_use]
    pub fn list_limit(&self) -> usize {
        self.list_limit
    }

    /// Window used by [`Self::badge`]
    #[inline]
    #[must_use]
    pub fn badge_limit(&self) -> usize {
        self.badge_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryLocalStore, InMemoryRemoteStore};
    use notify_model::{Document, NotificationId};

    const COLLECTION: &str = "notifications";

    fn doc(id: &str, secs: i64, read: bool) -> Document {
        Document::new(id)
            .with_field("recipientId", "c1")
            .with_field("recipientRole", "club")
            .with_field("type", "member_joined")
            .with_field("createdAt", secs * 1000)
            .with_field("read", read)
    }

    fn counter(remote: &InMemoryRemoteStore, local: &InMemoryLocalStore, config: &SyncConfig) -> UnreadCounter {
        let aggregator = Arc::new(Aggregator::new(Arc::new(remote.clone()), config));
        let reconciler = Arc::new(ReadStateReconciler::new(
            Arc::new(remote.clone()),
            Arc::new(local.clone()),
            config,
        ));
        UnreadCounter::new(aggregator, reconciler, config)
    }

    #[tokio::test]
    async fn badge_and_list_agree() {
        let remote = InMemoryRemoteStore::new();
        remote.insert_many(COLLECTION, (0..8).map(|i| doc(&format!("n{i}"), i, i % 3 == 0)));
        let local = InMemoryLocalStore::new();
        local.seed("readNotifications_c1_club", r#"["n1"]"#);
        let config = SyncConfig::default();
        let counter = counter(&remote, &local, &config);
        let user = UserId::new("c1").unwrap();

        let list = counter.list(&user, RecipientRole::Club).await;
        let badge = counter.badge(&user, RecipientRole::Club).await;
        // n0, n3, n6 remote-read, n1 acked
        assert_eq!(list.unread, 4);
        assert_eq!(badge, list.unread);
    }

    #[tokio::test]
    async fn badge_counts_leading_window_of_list() {
        let remote = InMemoryRemoteStore::new();
        remote.insert_many(COLLECTION, (0..10).map(|i| doc(&format!("n{i}"), i, false)));
        let local = InMemoryLocalStore::new();
        let config = SyncConfig::default().with_badge_limit(4).with_list_limit(10);
        let counter = counter(&remote, &local, &config);
        let user = UserId::new("c1").unwrap();

        let list = counter.list(&user, RecipientRole::Club).await;
        let badge = counter.badge(&user, RecipientRole::Club).await;
        assert_eq!(list.unread, 10);
        assert_eq!(badge, count_unread(&list.notifications[..4]));
    }

    #[test]
    fn count_rule() {
        let remote = InMemoryRemoteStore::new();
        remote.insert(COLLECTION, doc("a", 1, true));
        let docs = remote.documents(COLLECTION);
        let list = crate::aggregator::resolve_source(
            &docs,
            notify_model::SourceKind::RoleScoped,
            RecipientRole::Club,
            COLLECTION,
        );
        assert_eq!(count_unread(&list), 0);
        assert_eq!(list[0].id, NotificationId::new("a"));
    }
}
