//! In-memory store implementations
//!
//! [`InMemoryRemoteStore`] behaves like the document store closely enough to
//! drive the whole engine: it evaluates filters, ordering and limits, delivers
//! live snapshots on every write, and can be told to fail in the specific ways
//! the backend does (permission errors, building indexes, outages).
//! [`InMemoryLocalStore`] is a map behind a lock with optional faults.

use crate::error::{LocalStoreError, StoreError};
use crate::store::{
    Direction, LocalStore, Patch, Query, RemoteStore, RemoteSubscription, SnapshotResult,
    SubscriptionGuard,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use notify_model::{parse_timestamp, Document, NotificationId};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

type QueryMatcher = Box<dyn Fn(&Query) -> bool + Send + Sync>;

struct QueryFault {
    matcher: QueryMatcher,
    error: StoreError,
}

struct Subscriber {
    query: Query,
    tx: mpsc::UnboundedSender<SnapshotResult>,
}

#[derive(Default)]
struct Counters {
    queries: AtomicUsize,
    subscribes: AtomicUsize,
    cancels: AtomicUsize,
    updates: AtomicUsize,
}

#[derive(Default)]
struct RemoteInner {
    collections: RwLock<HashMap<String, IndexMap<String, Document>>>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_subscriber: AtomicU64,
    query_faults: Mutex<Vec<QueryFault>>,
    subscribe_faults: Mutex<Vec<QueryFault>>,
    update_faults: Mutex<VecDeque<StoreError>>,
    sticky_update_fault: Mutex<Option<StoreError>>,
    index_building: AtomicBool,
    latency: Mutex<Duration>,
    counters: Counters,
}

impl RemoteInner {
    fn evaluate(&self, query: &Query) -> Vec<Document> {
        let collections = self.collections.read();
        let Some(docs) = collections.get(&query.collection) else {
            return Vec::new();
        };
        let mut hits: Vec<Document> = docs.values().filter(|d| query.matches(d)).cloned().collect();

        if let Some(order) = &query.order_by {
            let key = |d: &Document| d.get(&order.field).and_then(parse_timestamp).or(d.create_time);
            hits.sort_by(|a, b| {
                let by_field = match order.direction {
                    Direction::Asc => key(a).cmp(&key(b)),
                    Direction::Desc => key(b).cmp(&key(a)),
                };
                by_field.then_with(|| a.id.cmp(&b.id))
            });
        }
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        hits
    }

    fn check_faults(&self, faults: &Mutex<Vec<QueryFault>>, query: &Query) -> Result<(), StoreError> {
        if let Some(fault) = faults.lock().iter().find(|f| (f.matcher)(query)) {
            return Err(fault.error.clone());
        }
        if self.index_building.load(Ordering::SeqCst) && query.requires_composite_index() {
            return Err(StoreError::index_building(format!(
                "the query requires an index that is still building: {}",
                query.signature()
            )));
        }
        Ok(())
    }

    fn notify(&self, collection: &str) {
        let subscribers = self.subscribers.lock();
        for subscriber in subscribers.values() {
            if subscriber.query.collection == collection {
                let _ = subscriber.tx.send(Ok(self.evaluate(&subscriber.query)));
            }
        }
    }

    fn notify_error(&self, collection: &str, error: &StoreError) {
        let subscribers = self.subscribers.lock();
        for subscriber in subscribers.values() {
            if subscriber.query.collection == collection {
                let _ = subscriber.tx.send(Err(error.clone()));
            }
        }
    }

    fn unsubscribe(&self, id: u64) {
        if self.subscribers.lock().remove(&id).is_some() {
            self.counters.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

/// In-memory document store with live subscriptions and fault injection
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryRemoteStore {
    inner: Arc<RemoteInner>,
}

impl InMemoryRemoteStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document and notify live subscriptions
    pub fn insert(&self, collection: &str, doc: Document) {
        self.inner
            .collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id.clone(), doc);
        self.inner.notify(collection);
    }

    /// Insert many documents with a single notification
    pub fn insert_many(&self, collection: &str, docs: impl IntoIterator<Item = Document>) {
        {
            let mut collections = self.inner.collections.write();
            let target = collections.entry(collection.to_string()).or_default();
            for doc in docs {
                target.insert(doc.id.clone(), doc);
            }
        }
        self.inner.notify(collection);
    }

    /// Remove a document and notify live subscriptions
    pub fn remove(&self, collection: &str, id: &str) -> Option<Document> {
        let removed = self
            .inner
            .collections
            .write()
            .get_mut(collection)
            .and_then(|docs| docs.shift_remove(id));
        if removed.is_some() {
            self.inner.notify(collection);
        }
        removed
    }

    /// Current state of one document
    #[must_use]
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.inner
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    /// All documents in a collection, in insertion order
    #[must_use]
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner
            .collections
            .read()
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Re-deliver the current snapshot to every live subscription on `collection`
    pub fn push(&self, collection: &str) {
        self.inner.notify(collection);
    }

    /// Deliver an error to every live subscription on `collection`
    pub fn push_error(&self, collection: &str, error: &StoreError) {
        self.inner.notify_error(collection, error);
    }

    /// Fail one-shot queries matching `matcher`
    pub fn fail_queries(
        &self,
        matcher: impl Fn(&Query) -> bool + Send + Sync + 'static,
        error: StoreError,
    ) {
        self.inner.query_faults.lock().push(QueryFault {
            matcher: Box::new(matcher),
            error,
        });
    }

    /// Fail subscription attempts matching `matcher`
    pub fn fail_subscriptions(
        &self,
        matcher: impl Fn(&Query) -> bool + Send + Sync + 'static,
        error: StoreError,
    ) {
        self.inner.subscribe_faults.lock().push(QueryFault {
            matcher: Box::new(matcher),
            error,
        });
    }

    /// Fail the next `times` updates
    pub fn fail_next_updates(&self, times: usize, error: StoreError) {
        let mut faults = self.inner.update_faults.lock();
        faults.extend(std::iter::repeat(error).take(times));
    }

    /// Fail every update until faults are cleared
    pub fn fail_updates(&self, error: StoreError) {
        *self.inner.sticky_update_fault.lock() = Some(error);
    }

    /// Reject queries that need a composite index
    pub fn set_index_building(&self, building: bool) {
        self.inner.index_building.store(building, Ordering::SeqCst);
    }

    /// Delay every async operation
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    /// Remove every injected fault and latency
    pub fn clear_faults(&self) {
        self.inner.query_faults.lock().clear();
        self.inner.subscribe_faults.lock().clear();
        self.inner.update_faults.lock().clear();
        *self.inner.sticky_update_fault.lock() = None;
        self.inner.index_building.store(false, Ordering::SeqCst);
        *self.inner.latency.lock() = Duration::ZERO;
    }

    /// Number of `query` calls
    #[must_use]
    pub fn query_calls(&self) -> usize {
        self.inner.counters.queries.load(Ordering::SeqCst)
    }

    /// Number of successful `subscribe` calls
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.inner.counters.subscribes.load(Ordering::SeqCst)
    }

    /// Number of cancelled subscriptions
    #[must_use]
    pub fn cancel_calls(&self) -> usize {
        self.inner.counters.cancels.load(Ordering::SeqCst)
    }

    /// Number of `update` calls, failed ones included
    #[must_use]
    pub fn update_calls(&self) -> usize {
        self.inner.counters.updates.load(Ordering::SeqCst)
    }

    /// Number of subscriptions not yet cancelled
    #[must_use]
    pub fn live_subscriptions(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl std::fmt::Debug for InMemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRemoteStore")
            .field("collections", &self.inner.collections.read().len())
            .field("live_subscriptions", &self.live_subscriptions())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.inner.counters.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.simulate_latency().await;
        self.inner.check_faults(&self.inner.query_faults, query)?;
        Ok(self.inner.evaluate(query))
    }

    fn subscribe(&self, query: &Query) -> Result<RemoteSubscription, StoreError> {
        self.inner.check_faults(&self.inner.subscribe_faults, query)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(self.inner.evaluate(query)));

        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.lock().insert(
            id,
            Subscriber {
                query: query.clone(),
                tx,
            },
        );
        self.inner.counters.subscribes.fetch_add(1, Ordering::SeqCst);

        let weak: Weak<RemoteInner> = Arc::downgrade(&self.inner);
        let guard = SubscriptionGuard::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.unsubscribe(id);
            }
        });
        Ok(RemoteSubscription { batches: rx, guard })
    }

    async fn update(
        &self,
        collection: &str,
        id: &NotificationId,
        patch: Patch,
    ) -> Result<(), StoreError> {
        self.inner.counters.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.simulate_latency().await;

        if let Some(error) = self.inner.update_faults.lock().pop_front() {
            return Err(error);
        }
        if let Some(error) = self.inner.sticky_update_fault.lock().clone() {
            return Err(error);
        }

        {
            let mut collections = self.inner.collections.write();
            let doc = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id.as_str()))
                .ok_or_else(|| StoreError::not_found(format!("{collection}/{id}")))?;
            patch.apply_to(doc);
        }
        self.inner.notify(collection);
        Ok(())
    }
}

/// In-memory key-value store
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLocalStore {
    values: Arc<RwLock<HashMap<String, String>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    latency: Arc<Mutex<Duration>>,
}

impl InMemoryLocalStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a raw value without going through the async API
    pub fn seed(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// Read a raw value without going through the async API
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// Number of stored keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether the store holds no keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Make reads fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make writes and removals fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every operation
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_writable(&self) -> Result<(), LocalStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LocalStoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        self.simulate_latency().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LocalStoreError::Unavailable("reads disabled".into()));
        }
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), LocalStoreError> {
        self.simulate_latency().await;
        self.check_writable()?;
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        self.simulate_latency().await;
        self.check_writable()?;
        self.values.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn doc(id: &str, user: &str, millis: i64) -> Document {
        Document::new(id)
            .with_field("recipientId", user)
            .with_field("createdAt", millis)
    }

    fn store_with(docs: Vec<Document>) -> InMemoryRemoteStore {
        let store = InMemoryRemoteStore::new();
        store.insert_many("notifications", docs);
        store
    }

    #[tokio::test]
    async fn query_filters_orders_and_limits() {
        let store = store_with(vec![doc("a", "u1", 1), doc("b", "u1", 3), doc("c", "u2", 2), doc("d", "u1", 2)]);
        let q = Query::new("notifications")
            .where_eq("recipientId", "u1")
            .order_by("createdAt", Direction::Desc)
            .limit(2);
        let ids: Vec<_> = store.query(&q).await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, ["b", "d"]);
    }

    #[tokio::test]
    async fn index_building_rejects_ordered_filtered_queries() {
        let store = store_with(vec![doc("a", "u1", 1)]);
        store.set_index_building(true);
        let q = Query::new("notifications")
            .where_eq("recipientId", "u1")
            .order_by("createdAt", Direction::Desc);

        let err = store.query(&q).await.unwrap_err();
        assert!(err.is_index_building());
        assert_eq!(store.query(&q.without_order()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_faults_match_selectively() {
        let store = store_with(vec![doc("a", "u1", 1)]);
        store.fail_queries(|q| q.filters.len() == 1, StoreError::permission_denied("rules"));

        let narrow = Query::new("notifications").where_eq("recipientId", "u1");
        assert!(store.query(&narrow).await.unwrap_err().is_permission_denied());
        assert!(store.query(&Query::new("notifications")).await.is_ok());

        store.clear_faults();
        assert!(store.query(&narrow).await.is_ok());
    }

    #[tokio::test]
    async fn subscription_delivers_initial_and_subsequent_snapshots() {
        let store = store_with(vec![doc("a", "u1", 1)]);
        let q = Query::new("notifications").where_eq("recipientId", "u1");
        let mut sub = store.subscribe(&q).unwrap();

        let first = sub.batches.recv().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);

        store.insert("notifications", doc("b", "u1", 2));
        let second = sub.batches.recv().await.unwrap().unwrap();
        assert_eq!(second.len(), 2);

        assert_eq!(store.live_subscriptions(), 1);
        sub.guard.cancel();
        assert_eq!(store.live_subscriptions(), 0);
        assert_eq!(store.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn update_applies_patch_and_counts_failures() {
        let store = store_with(vec![doc("a", "u1", 1)]);
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        store.fail_next_updates(1, StoreError::unavailable("offline"));

        let id = NotificationId::new("a");
        assert!(store.update("notifications", &id, Patch::mark_read(at)).await.is_err());
        store.update("notifications", &id, Patch::mark_read(at)).await.unwrap();
        assert_eq!(store.update_calls(), 2);
        assert_eq!(store.document("notifications", "a").unwrap().bool_field("read"), Some(true));

        let missing = store
            .update("notifications", &NotificationId::new("zz"), Patch::new())
            .await
            .unwrap_err();
        assert_eq!(missing.code, crate::error::StoreErrorCode::NotFound);
    }

    #[tokio::test]
    async fn local_store_faults() {
        let local = InMemoryLocalStore::new();
        local.set("k", "v".into()).await.unwrap();
        assert_eq!(local.get("k").await.unwrap().as_deref(), Some("v"));

        local.set_fail_writes(true);
        assert!(local.set("k", "w".into()).await.is_err());
        assert_eq!(local.peek("k").as_deref(), Some("v"));

        local.set_fail_reads(true);
        assert!(local.get("k").await.is_err());
    }
}
