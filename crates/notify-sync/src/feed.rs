//! Live feed reducer
//!
//! Deliveries from the multiplexer are turned into [`FeedEvent`]s and folded
//! into a [`FeedState`] with [`FeedState::apply`]. The state keeps the latest
//! snapshot per source; the published list is always re-derived from those
//! snapshots (merge, sort, window, reconcile), never patched in place.

use crate::ack::AckSet;
use crate::aggregator::{resolve_source, MergeRules};
use crate::counter::count_unread;
use crate::error::StoreError;
use crate::reconciler::{merge_read_state, read_ids};
use notify_model::{Document, Notification, RecipientRole, SourceKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What consumers render
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedView {
    /// Reconciled, merged list
    pub notifications: Vec<Notification>,
    /// Unread items in `notifications`
    pub unread: usize,
    /// Whether some source is not known to be current
    pub stale: bool,
}

impl FeedView {
    /// Build a view, counting unread items
    #[must_use]
    pub fn new(notifications: Vec<Notification>, stale: bool) -> Self {
        let unread = count_unread(&notifications);
        Self {
            notifications,
            unread,
            stale,
        }
    }

    /// Empty view marked stale
    #[must_use]
    pub fn empty_stale() -> Self {
        Self {
            stale: true,
            ..Self::default()
        }
    }

    /// Number of items
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    /// Whether there are no items
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

/// Input to the reducer
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// New full snapshot of one source
    SourceSnapshot {
        /// Which sub-query
        source: SourceKind,
        /// Raw documents
        documents: Arc<Vec<Document>>,
    },
    /// Live feed of one source failed
    SourceError {
        /// Which sub-query
        source: SourceKind,
        /// Remote error
        error: Arc<StoreError>,
    },
    /// Local acknowledgments grew
    AckChanged(AckSet),
}

/// Reducer state for one `(user, role)` feed
#[derive(Debug, Clone)]
pub struct FeedState {
    role: RecipientRole,
    collection: String,
    limit: usize,
    rules: MergeRules,
    sources: Vec<SourceKind>,
    snapshots: HashMap<SourceKind, Vec<Notification>>,
    fresh: HashSet<SourceKind>,
    acks: AckSet,
    seen_read: AckSet,
    view: FeedView,
}

impl FeedState {
    /// Empty state; every source starts stale
    #[must_use]
    pub fn new(
        role: RecipientRole,
        collection: impl Into<String>,
        limit: usize,
        rules: MergeRules,
        acks: AckSet,
    ) -> Self {
        let mut sources = vec![SourceKind::RoleScoped];
        if role.reads_legacy() {
            sources.push(SourceKind::LegacyFallback);
        }
        Self {
            role,
            collection: collection.into(),
            limit,
            rules,
            sources,
            snapshots: HashMap::new(),
            fresh: HashSet::new(),
            acks,
            seen_read: AckSet::new(),
            view: FeedView::empty_stale(),
        }
        .rederive()
    }

    /// Seed from an already merged and reconciled list
    ///
    /// Items are split back into per-source snapshots by their origin. When
    /// `stale` is false every source counts as current.
    #[must_use]
    pub fn with_baseline(mut self, list: Vec<Notification>, stale: bool) -> Self {
        self.seen_read.extend(read_ids(&list));
        let mut snapshots: HashMap<SourceKind, Vec<Notification>> = HashMap::new();
        for n in list {
            snapshots.entry(n.origin.source).or_default().push(n);
        }
        self.snapshots = snapshots;
        self.fresh = if stale {
            HashSet::new()
        } else {
            self.sources.iter().copied().collect()
        };
        self.rederive()
    }

    /// Fold one event into the state
    #[must_use]
    pub fn apply(mut self, event: FeedEvent) -> Self {
        match event {
            FeedEvent::SourceSnapshot { source, documents } => {
                let resolved = resolve_source(&documents, source, self.role, &self.collection);
                self.snapshots.insert(source, resolved);
                self.fresh.insert(source);
            }
            FeedEvent::SourceError { source, error } if error.is_permission_denied() => {
                tracing::warn!(source = source.as_str(), error = %error, "live source permission denied");
                self.snapshots.insert(source, Vec::new());
                self.fresh.insert(source);
            }
            FeedEvent::SourceError { source, error } => {
                tracing::warn!(source = source.as_str(), error = %error, "live source failed, keeping last snapshot");
                self.fresh.remove(&source);
            }
            FeedEvent::AckChanged(acks) => self.acks.merge(&acks),
        }
        self.rederive()
    }

    /// Current derived view
    #[inline]
    #[must_use]
    pub fn view(&self) -> &FeedView {
        &self.view
    }

    /// Ids presented as read so far
    #[inline]
    #[must_use]
    pub fn seen_read(&self) -> &AckSet {
        &self.seen_read
    }

    /// Sources this feed listens to
    #[inline]
    #[must_use]
    pub fn sources(&self) -> &[SourceKind] {
        &self.sources
    }

    fn rederive(mut self) -> Self {
        let snapshot = |kind: SourceKind| self.snapshots.get(&kind).cloned().unwrap_or_default();
        let merged = self.rules.apply(
            snapshot(SourceKind::RoleScoped),
            snapshot(SourceKind::LegacyFallback),
            self.limit,
        );
        let reconciled = merge_read_state(merged, &self.acks.union(&self.seen_read));
        self.seen_read.extend(read_ids(&reconciled));
        let stale = self.sources.iter().any(|s| !self.fresh.contains(s));
        self.view = FeedView::new(reconciled, stale);
        self
    }
}
