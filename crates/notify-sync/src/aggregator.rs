//! Notification aggregation
//!
//! A fetch issues one role-scoped sub-query and, for clubs, a legacy
//! fallback sub-query that keeps records lacking the role discriminator
//! (plus club records tagged only with the older `recipientType` field).
//! Results are merged by id (first seen wins, so the role-scoped copy beats
//! the legacy one), sorted newest first and windowed.
//!
//! Every sub-query reads the same `scan_limit` newest records whatever the
//! window, and the window is cut only after filtering. Smaller windows are
//! therefore always prefixes of larger ones, and a live subscription on the
//! same sub-query sees exactly what a fetch sees.
//!
//! Sub-query failures are handled individually:
//! - permission denied: logged, contributes nothing
//! - index building: retried without the ordering clause, sorted here
//! - anything else: the sub-query is lost; if every sub-query is lost the
//!   cached list is served and marked stale

use crate::config::SyncConfig;
use crate::error::{StoreError, StoreErrorCode};
use crate::store::{Direction, Query, RemoteStore};
use futures::future::join_all;
use indexmap::IndexMap;
use notify_cache::{Clock, QueryCache, SystemClock};
use notify_model::{
    fields, sort_newest_first, Document, Notification, Origin, RecipientRole, SchemaRecord,
    SourceKind, UserId,
};
use std::sync::Arc;

/// Deduplicate by id (first seen wins), sort newest first, keep `limit`
#[must_use]
pub fn merge_sources(
    primary: Vec<Notification>,
    legacy: Vec<Notification>,
    limit: usize,
) -> Vec<Notification> {
    let mut by_id: IndexMap<_, Notification> = IndexMap::with_capacity(primary.len() + legacy.len());
    for n in primary.into_iter().chain(legacy) {
        by_id.entry(n.id.clone()).or_insert(n);
    }
    let mut merged: Vec<Notification> = by_id.into_values().collect();
    sort_newest_first(&mut merged);
    merged.truncate(limit);
    merged
}

/// Filtering shared by every list and counter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeRules {
    excluded_kinds: Vec<String>,
}

impl MergeRules {
    /// Rules hiding the given type tags
    #[must_use]
    pub fn new(excluded_kinds: Vec<String>) -> Self {
        Self { excluded_kinds }
    }

    /// Rules from configuration
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.excluded_kinds.clone())
    }

    /// Whether a type tag is hidden
    #[inline]
    #[must_use]
    pub fn is_excluded(&self, kind: &str) -> bool {
        self.excluded_kinds.iter().any(|k| k == kind)
    }

    /// Drop hidden records, then [`merge_sources`]
    #[must_use]
    pub fn apply(
        &self,
        primary: Vec<Notification>,
        legacy: Vec<Notification>,
        limit: usize,
    ) -> Vec<Notification> {
        let visible = |n: &Notification| !self.is_excluded(&n.kind);
        merge_sources(
            primary.into_iter().filter(visible).collect(),
            legacy.into_iter().filter(visible).collect(),
            limit,
        )
    }
}

/// Resolve one sub-query's documents
///
/// Role-scoped results keep current-schema records for `role`. Legacy
/// results keep records without the discriminator, attributed to
/// [`RecipientRole::Club`], and current-schema records for `role`; the
/// latter catches records tagged with `recipientType` only, which the
/// role-scoped filter cannot match. Unresolvable documents are skipped.
#[must_use]
pub fn resolve_source(
    docs: &[Document],
    source: SourceKind,
    role: RecipientRole,
    collection: &str,
) -> Vec<Notification> {
    let origin = Origin::new(source, collection);
    docs.iter()
        .filter_map(|doc| match SchemaRecord::from_document(doc, origin.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(id = %doc.id, error = %e, "skipping unresolvable document");
                None
            }
        })
        .filter_map(|record| match (source, record) {
            (SourceKind::RoleScoped, SchemaRecord::Current(n)) if n.recipient_role == role => Some(n),
            (SourceKind::LegacyFallback, SchemaRecord::Legacy(l)) => Some(l.attribute(RecipientRole::Club)),
            (SourceKind::LegacyFallback, SchemaRecord::Current(n)) if n.recipient_role == role => Some(n),
            _ => None,
        })
        .collect()
}

/// Role-scoped sub-query
#[must_use]
pub fn role_scoped_query(collection: &str, user: &UserId, role: RecipientRole, limit: usize) -> Query {
    Query::new(collection)
        .where_eq(fields::RECIPIENT_ID, user.as_str())
        .where_eq(fields::RECIPIENT_ROLE, role.as_str())
        .order_by(fields::CREATED_AT, Direction::Desc)
        .limit(limit)
}

/// Legacy fallback sub-query (no role filter)
#[must_use]
pub fn legacy_query(collection: &str, user: &UserId, limit: usize) -> Query {
    Query::new(collection)
        .where_eq(fields::RECIPIENT_ID, user.as_str())
        .order_by(fields::CREATED_AT, Direction::Desc)
        .limit(limit)
}

/// Sub-queries a fetch for `role` issues
#[must_use]
pub fn source_queries(
    collection: &str,
    user: &UserId,
    role: RecipientRole,
    limit: usize,
) -> Vec<(SourceKind, Query)> {
    let mut queries = vec![(SourceKind::RoleScoped, role_scoped_query(collection, user, role, limit))];
    if role.reads_legacy() {
        queries.push((SourceKind::LegacyFallback, legacy_query(collection, user, limit)));
    }
    queries
}

/// Why a sub-query did not contribute normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradeReason {
    /// Permission error swallowed
    PermissionDenied,
    /// Served by the unordered fallback query
    IndexFallback,
    /// Lost to another remote error
    Failed(StoreErrorCode),
}

/// A sub-query that degraded during a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegradedSource {
    /// Which sub-query
    pub source: SourceKind,
    /// What happened
    pub reason: DegradeReason,
}

/// Result of one aggregated fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Merged list, remote read flags not yet reconciled
    pub notifications: Vec<Notification>,
    /// Whether the list is (partly) served from cache or incomplete
    pub stale: bool,
    /// Sub-queries that degraded
    pub degraded: Vec<DegradedSource>,
}

impl FetchOutcome {
    /// Whether any sub-query degraded
    #[inline]
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

struct SubQueryResult {
    source: SourceKind,
    docs: Option<Vec<Document>>,
    degraded: Vec<DegradedSource>,
}

/// Cache key for one identity and window
#[must_use]
pub fn cache_key(user: &UserId, role: RecipientRole, limit: usize) -> String {
    format!("{}{limit}", cache_prefix(user, role))
}

/// Cache key prefix covering every window of one identity
///
/// The user id is length-prefixed, so no id can be a prefix of another's key.
#[must_use]
pub fn cache_prefix(user: &UserId, role: RecipientRole) -> String {
    format!("notifications:{role}:{}:{user}:", user.as_str().len())
}

/// Fetches and merges notification sources
pub struct Aggregator {
    remote: Arc<dyn RemoteStore>,
    cache: QueryCache<Vec<Notification>>,
    collection: String,
    list_limit: usize,
    scan_limit: usize,
    rules: MergeRules,
}

impl Aggregator {
    /// Create with the system clock
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, config: &SyncConfig) -> Self {
        Self::with_clock(remote, config, Arc::new(SystemClock))
    }

    /// Create with an explicit cache clock
    #[must_use]
    pub fn with_clock(remote: Arc<dyn RemoteStore>, config: &SyncConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote,
            cache: QueryCache::with_clock(config.cache_capacity, config.cache_ttl(), clock),
            collection: config.collection.clone(),
            list_limit: config.list_limit,
            scan_limit: config.scan_limit,
            rules: MergeRules::from_config(config),
        }
    }

    /// Merge rules in effect
    #[inline]
    #[must_use]
    pub fn rules(&self) -> &MergeRules {
        &self.rules
    }

    /// Remote collection
    #[inline]
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Window used by [`Self::fetch_all`]
    #[inline]
    #[must_use]
    pub fn list_limit(&self) -> usize {
        self.list_limit
    }

    /// Records each sub-query reads
    #[inline]
    #[must_use]
    pub fn scan_limit(&self) -> usize {
        self.scan_limit
    }

    /// Result cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &QueryCache<Vec<Notification>> {
        &self.cache
    }

    /// Fetch with the list window
    pub async fn fetch_all(&self, user: &UserId, role: RecipientRole) -> FetchOutcome {
        self.fetch_with_limit(user, role, self.list_limit).await
    }

    /// Fetch with an explicit window
    ///
    /// The window only truncates the merged list; sub-queries always read
    /// [`Self::scan_limit`] records.
    pub async fn fetch_with_limit(
        &self,
        user: &UserId,
        role: RecipientRole,
        limit: usize,
    ) -> FetchOutcome {
        let queries = source_queries(&self.collection, user, role, self.scan_limit);
        let results = join_all(
            queries
                .into_iter()
                .map(|(source, query)| self.run_sub_query(source, query)),
        )
        .await;

        let degraded: Vec<DegradedSource> = results.iter().flat_map(|r| r.degraded.iter().copied()).collect();
        let lost = results.iter().filter(|r| r.docs.is_none()).count();
        let key = cache_key(user, role, limit);

        if lost == results.len() {
            let cached = self.cache.get(&key);
            tracing::warn!(
                user = %user,
                role = %role,
                cached = cached.is_some(),
                "every sub-query failed, serving cached list"
            );
            return FetchOutcome {
                notifications: cached.unwrap_or_default(),
                stale: true,
                degraded,
            };
        }

        let mut primary = Vec::new();
        let mut legacy = Vec::new();
        for result in results {
            let Some(docs) = result.docs else { continue };
            let resolved = resolve_source(&docs, result.source, role, &self.collection);
            match result.source {
                SourceKind::RoleScoped => primary = resolved,
                SourceKind::LegacyFallback => legacy = resolved,
            }
        }

        let notifications = self.rules.apply(primary, legacy, limit);
        if lost == 0 {
            self.cache.set_default(key, notifications.clone());
        }
        tracing::debug!(
            user = %user,
            role = %role,
            count = notifications.len(),
            degraded = degraded.len(),
            "fetched notifications"
        );
        FetchOutcome {
            notifications,
            stale: lost > 0,
            degraded,
        }
    }

    /// Cached list for an optimistic first paint
    #[must_use]
    pub fn fetch_cached(&self, user: &UserId, role: RecipientRole, limit: usize) -> Option<Vec<Notification>> {
        self.cache.get(&cache_key(user, role, limit))
    }

    /// Drop every cached window for one identity
    pub fn invalidate(&self, user: &UserId, role: RecipientRole) -> usize {
        self.cache.invalidate_prefix(&cache_prefix(user, role))
    }

    async fn run_sub_query(&self, source: SourceKind, query: Query) -> SubQueryResult {
        let mut degraded = Vec::new();
        let first = self.remote.query(&query).await;
        let outcome = match first {
            Err(e) if e.is_index_building() && query.order_by.is_some() => {
                tracing::info!(source = source.as_str(), "index building, falling back to unordered query");
                degraded.push(DegradedSource {
                    source,
                    reason: DegradeReason::IndexFallback,
                });
                self.remote.query(&query.without_order()).await
            }
            other => other,
        };

        let docs = match outcome {
            Ok(docs) => Some(docs),
            Err(e) => classify_failure(source, &e, &mut degraded),
        };
        SubQueryResult {
            source,
            docs,
            degraded,
        }
    }
}

fn classify_failure(
    source: SourceKind,
    error: &StoreError,
    degraded: &mut Vec<DegradedSource>,
) -> Option<Vec<Document>> {
    if error.is_permission_denied() {
        tracing::warn!(source = source.as_str(), error = %error, "sub-query permission denied, skipping");
        degraded.push(DegradedSource {
            source,
            reason: DegradeReason::PermissionDenied,
        });
        Some(Vec::new())
    } else {
        tracing::warn!(source = source.as_str(), error = %error, "sub-query failed");
        degraded.push(DegradedSource {
            source,
            reason: DegradeReason::Failed(error.code),
        });
        None
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("collection", &self.collection)
            .field("list_limit", &self.list_limit)
            .field("scan_limit", &self.scan_limit)
            .field("rules", &self.rules)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockRemoteStore;
    use mockall::predicate::function;
    use notify_cache::ManualClock;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn user() -> UserId {
        UserId::new("c1").unwrap()
    }

    fn current(id: &str, secs: i64) -> Document {
        Document::new(id)
            .with_field("recipientId", "c1")
            .with_field("recipientRole", "club")
            .with_field("type", "member_joined")
            .with_field("createdAt", secs * 1000)
    }

    fn legacy(id: &str, secs: i64) -> Document {
        Document::new(id)
            .with_field("recipientId", "c1")
            .with_field("type", "event_created")
            .with_field("createdAt", secs * 1000)
    }

    fn is_legacy_query(q: &Query) -> bool {
        !q.filters.iter().any(|f| f.field == fields::RECIPIENT_ROLE)
    }

    fn ids(list: &[Notification]) -> Vec<&str> {
        list.iter().map(|n| n.id.as_str()).collect()
    }

    fn aggregator(remote: MockRemoteStore) -> Aggregator {
        Aggregator::new(Arc::new(remote), &SyncConfig::default())
    }

    #[test]
    fn merge_prefers_first_seen_and_sorts() {
        let primary = resolve_source(&[current("a", 10), current("b", 30)], SourceKind::RoleScoped, RecipientRole::Club, "n");
        let legacy_docs = [legacy("b", 30), legacy("c", 20)];
        let legacy_list = resolve_source(&legacy_docs, SourceKind::LegacyFallback, RecipientRole::Club, "n");

        let merged = merge_sources(primary, legacy_list, 100);
        assert_eq!(ids(&merged), ["b", "c", "a"]);
        // "b" kept from the role-scoped source
        assert!(!merged[0].is_legacy());
        assert!(merged[1].is_legacy());
    }

    #[test]
    fn merge_caps_window() {
        let primary: Vec<_> = (0..10).map(|i| current(&format!("n{i}"), i)).collect();
        let list = resolve_source(&primary, SourceKind::RoleScoped, RecipientRole::Club, "n");
        let merged = merge_sources(list, Vec::new(), 3);
        assert_eq!(ids(&merged), ["n9", "n8", "n7"]);
    }

    #[test]
    fn legacy_source_drops_other_roles_and_attributes_club() {
        let student = current("student", 3).with_field("recipientRole", "student");
        let docs = [legacy("old", 1), student, current("new", 2)];
        let list = resolve_source(&docs, SourceKind::LegacyFallback, RecipientRole::Club, "n");
        assert_eq!(ids(&list), ["old", "new"]);
        assert!(list.iter().all(|n| n.recipient_role == RecipientRole::Club));
    }

    #[test]
    fn legacy_source_keeps_records_tagged_with_recipient_type() {
        let tagged = legacy("tagged", 1).with_field("recipientType", "club");
        let list = resolve_source(&[tagged.clone()], SourceKind::LegacyFallback, RecipientRole::Club, "n");
        assert_eq!(ids(&list), ["tagged"]);

        // the role-scoped filter never matches it, so the fallback is its only path
        let scoped = resolve_source(&[tagged], SourceKind::RoleScoped, RecipientRole::Club, "n");
        let merged = merge_sources(scoped, list, 10);
        assert_eq!(ids(&merged), ["tagged"]);
    }

    #[test]
    fn cache_prefix_does_not_cover_longer_ids() {
        let short = user();
        let long = UserId::new("c1:x").unwrap();
        let prefix = cache_prefix(&short, RecipientRole::Club);
        assert!(cache_key(&short, RecipientRole::Club, 100).starts_with(&prefix));
        assert!(!cache_key(&long, RecipientRole::Club, 100).starts_with(&prefix));
    }

    #[test]
    fn excluded_kinds_are_hidden() {
        let rules = MergeRules::new(vec!["debug".into()]);
        let docs = [current("a", 1).with_field("type", "debug"), current("b", 2)];
        let list = resolve_source(&docs, SourceKind::RoleScoped, RecipientRole::Club, "n");
        assert_eq!(ids(&rules.apply(list, Vec::new(), 10)), ["b"]);
    }

    #[test]
    fn students_issue_only_the_role_scoped_query() {
        let student = UserId::new("s1").unwrap();
        let queries = source_queries("n", &student, RecipientRole::Student, 100);
        assert_eq!(queries.len(), 1);
        assert_eq!(source_queries("n", &user(), RecipientRole::Club, 100).len(), 2);
    }

    #[tokio::test]
    async fn legacy_permission_error_is_swallowed() {
        let mut remote = MockRemoteStore::new();
        remote
            .expect_query()
            .with(function(is_legacy_query))
            .returning(|_| Err(StoreError::permission_denied("missing field rule")));
        remote
            .expect_query()
            .with(function(|q: &Query| !is_legacy_query(q)))
            .returning(|_| Ok(vec![current("a", 1)]));

        let outcome = aggregator(remote).fetch_all(&user(), RecipientRole::Club).await;
        assert_eq!(ids(&outcome.notifications), ["a"]);
        assert!(!outcome.stale);
        assert_eq!(
            outcome.degraded,
            vec![DegradedSource {
                source: SourceKind::LegacyFallback,
                reason: DegradeReason::PermissionDenied
            }]
        );
    }

    #[tokio::test]
    async fn index_building_falls_back_and_sorts_client_side() {
        let mut remote = MockRemoteStore::new();
        remote
            .expect_query()
            .with(function(|q: &Query| q.order_by.is_some()))
            .returning(|_| Err(StoreError::index_building("index building")));
        remote
            .expect_query()
            .with(function(|q: &Query| q.order_by.is_none() && !is_legacy_query(q)))
            .returning(|q| {
                assert_eq!(q.limit, Some(500));
                Ok(vec![current("old", 1), current("new", 5), current("mid", 3)])
            });
        remote
            .expect_query()
            .with(function(|q: &Query| q.order_by.is_none() && is_legacy_query(q)))
            .returning(|_| Ok(vec![legacy("legacy", 4)]));

        let outcome = aggregator(remote).fetch_all(&user(), RecipientRole::Club).await;
        assert_eq!(ids(&outcome.notifications), ["new", "legacy", "mid", "old"]);
        assert_eq!(outcome.degraded.len(), 2);
        assert!(outcome.degraded.iter().all(|d| d.reason == DegradeReason::IndexFallback));
    }

    #[tokio::test]
    async fn outage_serves_cached_list_as_stale() {
        let mut remote = MockRemoteStore::new();
        let mut calls = 0;
        remote.expect_query().returning(move |q| {
            calls += 1;
            if calls <= 2 {
                Ok(if is_legacy_query(q) { vec![] } else { vec![current("a", 1)] })
            } else {
                Err(StoreError::unavailable("offline"))
            }
        });
        let agg = aggregator(remote);

        let fresh = agg.fetch_all(&user(), RecipientRole::Club).await;
        assert!(!fresh.stale);

        let offline = agg.fetch_all(&user(), RecipientRole::Club).await;
        assert!(offline.stale);
        assert_eq!(ids(&offline.notifications), ["a"]);
        assert_eq!(offline.degraded.len(), 2);
    }

    #[tokio::test]
    async fn outage_without_cache_is_empty_and_stale() {
        let mut remote = MockRemoteStore::new();
        remote
            .expect_query()
            .returning(|_| Err(StoreError::unavailable("offline")));
        let outcome = aggregator(remote).fetch_all(&user(), RecipientRole::Student).await;
        assert!(outcome.notifications.is_empty());
        assert!(outcome.stale);
    }

    #[tokio::test]
    async fn partial_outage_is_stale_and_not_cached() {
        let mut remote = MockRemoteStore::new();
        remote
            .expect_query()
            .with(function(is_legacy_query))
            .returning(|_| Err(StoreError::unavailable("offline")));
        remote
            .expect_query()
            .with(function(|q: &Query| !is_legacy_query(q)))
            .returning(|_| Ok(vec![current("a", 1)]));
        let agg = aggregator(remote);

        let outcome = agg.fetch_all(&user(), RecipientRole::Club).await;
        assert!(outcome.stale);
        assert_eq!(ids(&outcome.notifications), ["a"]);
        assert!(agg.fetch_cached(&user(), RecipientRole::Club, 100).is_none());
    }

    #[tokio::test]
    async fn cache_entries_expire_and_invalidate() {
        let mut remote = MockRemoteStore::new();
        remote.expect_query().returning(|_| Ok(vec![current("a", 1)]));
        let clock = Arc::new(ManualClock::new());
        let config = SyncConfig::default().with_cache_ttl(Duration::from_millis(100));
        let agg = Aggregator::with_clock(Arc::new(remote), &config, clock.clone());

        agg.fetch_with_limit(&user(), RecipientRole::Club, 50).await;
        agg.fetch_with_limit(&user(), RecipientRole::Club, 100).await;
        assert!(agg.fetch_cached(&user(), RecipientRole::Club, 50).is_some());

        assert_eq!(agg.invalidate(&user(), RecipientRole::Club), 2);
        assert!(agg.fetch_cached(&user(), RecipientRole::Club, 100).is_none());

        agg.fetch_all(&user(), RecipientRole::Club).await;
        clock.advance(Duration::from_millis(150));
        assert!(agg.fetch_cached(&user(), RecipientRole::Club, 100).is_none());
    }
}
