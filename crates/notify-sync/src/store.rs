//! Store collaborators
//!
//! [`RemoteStore`] is the document store holding notification records;
//! [`LocalStore`] is the device-local key-value store holding ack sets.
//! Both are traits so the engine can run against in-memory doubles, files,
//! or a real backend adapter.

use crate::error::{LocalStoreError, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify_model::{fields, Document, NotificationId};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::mpsc;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

impl Direction {
    #[inline]
    const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Equality filter on one field
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Field name
    pub field: String,
    /// Required value
    pub value: Value,
}

impl Filter {
    /// Whether `doc` satisfies the filter
    #[inline]
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        doc.get(&self.field) == Some(&self.value)
    }
}

/// Ordering clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Field name
    pub field: String,
    /// Direction
    pub direction: Direction,
}

/// Query against one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Collection name
    pub collection: String,
    /// Conjunction of equality filters
    pub filters: Vec<Filter>,
    /// Optional ordering clause
    pub order_by: Option<OrderBy>,
    /// Optional result limit
    pub limit: Option<usize>,
}

impl Query {
    /// Unfiltered query over `collection`
    #[inline]
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Add an equality filter
    #[must_use]
    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    /// Set the ordering clause
    #[inline]
    #[must_use]
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    /// Set the result limit
    #[inline]
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Same filters and limit without the ordering clause
    #[inline]
    #[must_use]
    pub fn without_order(mut self) -> Self {
        self.order_by = None;
        self
    }

    /// Whether the backend needs a composite index to serve this query
    #[inline]
    #[must_use]
    pub fn requires_composite_index(&self) -> bool {
        !self.filters.is_empty() && self.order_by.is_some()
    }

    /// Whether `doc` satisfies every filter
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Canonical identity of this query
    ///
    /// Filter order does not affect the signature.
    #[must_use]
    pub fn signature(&self) -> QuerySignature {
        let mut filters: Vec<String> = self
            .filters
            .iter()
            .map(|f| format!("{}=={}", f.field, f.value))
            .collect();
        filters.sort();

        let mut sig = format!("{}?{}", self.collection, filters.join("&"));
        if let Some(order) = &self.order_by {
            sig.push('#');
            sig.push_str(&order.field);
            sig.push(':');
            sig.push_str(order.direction.as_str());
        }
        if let Some(limit) = self.limit {
            sig.push('@');
            sig.push_str(&limit.to_string());
        }
        QuerySignature(sig)
    }
}

/// Canonical query identity used to share subscriptions
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuerySignature(String);

impl QuerySignature {
    /// Wrap a caller-chosen signature
    #[inline]
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Partial field update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch(Map<String, Value>);

impl Patch {
    /// Empty patch
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set a field
    #[inline]
    #[must_use]
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    /// `read = true, readAt = at`
    #[must_use]
    pub fn mark_read(at: DateTime<Utc>) -> Self {
        Self::new()
            .set(fields::READ, true)
            .set(fields::READ_AT, at.to_rfc3339())
    }

    /// Field value set by this patch
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Apply to a document in place
    pub fn apply_to(&self, doc: &mut Document) {
        for (field, value) in &self.0 {
            doc.set(field, value.clone());
        }
    }
}

/// One delivery on a live subscription
pub type SnapshotResult = Result<Vec<Document>, StoreError>;

/// Cancels a remote subscription
///
/// `cancel` is idempotent; dropping the guard cancels as well.
pub struct SubscriptionGuard {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl SubscriptionGuard {
    /// Guard running `cancel` at most once
    #[must_use]
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Guard with nothing to cancel
    #[must_use]
    pub fn noop() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }

    /// Cancel the subscription
    pub fn cancel(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// Whether `cancel` has already run
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().is_none()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Live change feed for one query
#[derive(Debug)]
pub struct RemoteSubscription {
    /// Full result snapshots in delivery order
    pub batches: mpsc::UnboundedReceiver<SnapshotResult>,
    /// Cancels the feed
    pub guard: SubscriptionGuard,
}

/// Remote document store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Run a one-shot query
    ///
    /// # Errors
    /// Returns the backend's [`StoreError`]
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Open a live subscription; the first delivery is the current snapshot
    ///
    /// # Errors
    /// Returns the backend's [`StoreError`] if the feed cannot be opened
    fn subscribe(&self, query: &Query) -> Result<RemoteSubscription, StoreError>;

    /// Apply a partial update to one document
    ///
    /// # Errors
    /// Returns the backend's [`StoreError`]
    async fn update(
        &self,
        collection: &str,
        id: &NotificationId,
        patch: Patch,
    ) -> Result<(), StoreError>;
}

/// Device-local key-value store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Read a value
    ///
    /// # Errors
    /// Returns [`LocalStoreError`] on storage failure
    async fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError>;

    /// Write a value
    ///
    /// # Errors
    /// Returns [`LocalStoreError`] on storage failure
    async fn set(&self, key: &str, value: String) -> Result<(), LocalStoreError>;

    /// Remove a value
    ///
    /// # Errors
    /// Returns [`LocalStoreError`] on storage failure
    async fn remove(&self, key: &str) -> Result<(), LocalStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn role_query() -> Query {
        Query::new("notifications")
            .where_eq("recipientId", "u1")
            .where_eq("recipientRole", "club")
            .order_by("createdAt", Direction::Desc)
            .limit(100)
    }

    #[test]
    fn signature_ignores_filter_order() {
        let a = role_query();
        let b = Query::new("notifications")
            .where_eq("recipientRole", "club")
            .where_eq("recipientId", "u1")
            .order_by("createdAt", Direction::Desc)
            .limit(100);
        assert_eq!(a.signature(), b.signature());
        assert_eq!(
            a.signature().as_str(),
            r##"notifications?recipientId=="u1"&recipientRole=="club"#createdAt:desc@100"##
        );
    }

    #[test]
    fn signature_distinguishes_order_and_limit() {
        let ordered = role_query();
        let unordered = role_query().without_order();
        assert_ne!(ordered.signature(), unordered.signature());
        assert_ne!(role_query().limit(50).signature(), ordered.signature());
    }

    #[test]
    fn composite_index_detection() {
        assert!(role_query().requires_composite_index());
        assert!(!role_query().without_order().requires_composite_index());
        assert!(!Query::new("n").order_by("createdAt", Direction::Desc).requires_composite_index());
    }

    #[test]
    fn filters_match_documents() {
        let q = role_query();
        let hit = Document::new("a")
            .with_field("recipientId", "u1")
            .with_field("recipientRole", "club");
        let miss = Document::new("b").with_field("recipientId", "u1");
        assert!(q.matches(&hit));
        assert!(!q.matches(&miss));
    }

    #[test]
    fn patch_applies_fields() {
        let mut doc = Document::new("a").with_field("read", false);
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        Patch::mark_read(at).apply_to(&mut doc);
        assert_eq!(doc.bool_field("read"), Some(true));
        assert!(doc.has("readAt"));
    }

    #[test]
    fn guard_cancels_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let guard = SubscriptionGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        guard.cancel();
        guard.cancel();
        assert!(guard.is_cancelled());
        drop(guard);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guard_cancels_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        drop(SubscriptionGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
