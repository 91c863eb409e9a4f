//! Notification center
//!
//! The single context object consumers hold. It owns the multiplexer, the
//! aggregator (and its cache), the reconciler and the counter, all built
//! from one [`SyncConfig`] and the two injected stores. Tests build as many
//! isolated centers as they like.

use crate::ack::AckSet;
use crate::aggregator::{source_queries, Aggregator};
use crate::config::SyncConfig;
use crate::counter::UnreadCounter;
use crate::error::{StoreError, SyncError};
use crate::feed::{FeedEvent, FeedState, FeedView};
use crate::multiplexer::{ChangeCallback, ChangeEvent, ListenerId, SubscriptionMultiplexer};
use crate::reconciler::{read_ids, MarkAllOutcome, ReadStateReconciler};
use crate::store::{LocalStore, Query, QuerySignature, RemoteStore};
use notify_cache::{CacheStats, Clock, SystemClock};
use notify_model::{Notification, NotificationId, RecipientRole, SourceKind, UserId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shared state of one open feed
struct FeedShared {
    user: UserId,
    role: RecipientRole,
    state: Mutex<Option<FeedState>>,
    tx: watch::Sender<FeedView>,
    reconciler: Arc<ReadStateReconciler>,
    listeners: Mutex<Vec<(QuerySignature, ListenerId)>>,
    closed: AtomicBool,
}

impl FeedShared {
    fn is_for(&self, user: &UserId, role: RecipientRole) -> bool {
        self.role == role && &self.user == user && !self.closed.load(Ordering::SeqCst)
    }

    fn update(&self, f: impl FnOnce(FeedState) -> FeedState) {
        let mut slot = self.state.lock();
        let Some(state) = slot.take() else { return };
        let next = f(state);
        let view = next.view().clone();
        *slot = Some(next);
        drop(slot);

        self.reconciler
            .remember_read(&self.user, self.role, read_ids(&view.notifications));
        self.tx.send_replace(view);
    }

    fn dispatch(&self, event: FeedEvent) {
        self.update(|state| state.apply(event));
    }

    fn callback(self: &Arc<Self>, source: SourceKind) -> ChangeCallback {
        let weak = Arc::downgrade(self);
        Arc::new(move |event: &ChangeEvent| {
            let Some(shared) = weak.upgrade() else { return };
            let event = match event {
                ChangeEvent::Batch(documents) => FeedEvent::SourceSnapshot {
                    source,
                    documents: documents.clone(),
                },
                ChangeEvent::Error(error) => FeedEvent::SourceError {
                    source,
                    error: error.clone(),
                },
            };
            shared.dispatch(event);
        })
    }

    fn close(&self, multiplexer: &SubscriptionMultiplexer) {
        let mut listeners = self.listeners.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for (signature, id) in listeners.drain(..) {
            multiplexer.remove_listener(&signature, id);
        }
        tracing::debug!(user = %self.user, role = %self.role, "feed closed");
    }
}

/// Register one live listener on `query`
fn listen(
    shared: &Arc<FeedShared>,
    multiplexer: &SubscriptionMultiplexer,
    source: SourceKind,
    query: Query,
) -> Result<(QuerySignature, ListenerId), StoreError> {
    let signature = query.signature();
    let id = multiplexer.add_listener(&signature, shared.callback(source), || query)?;
    Ok((signature, id))
}

/// Fetch, rebase the feed on the result, then go live
///
/// Live listeners use the fetch's own sub-queries, so every snapshot covers
/// the same records the baseline was cut from. While an index is building
/// the unordered form is used instead.
async fn refresh(
    shared: Arc<FeedShared>,
    aggregator: Arc<Aggregator>,
    multiplexer: Arc<SubscriptionMultiplexer>,
) {
    let (user, role) = (shared.user.clone(), shared.role);
    let outcome = aggregator.fetch_all(&user, role).await;
    let list = shared.reconciler.reconcile(outcome.notifications, &user, role).await;
    shared.update(|state| state.with_baseline(list, outcome.stale));

    for (source, query) in source_queries(aggregator.collection(), &user, role, aggregator.scan_limit()) {
        let mut registered = shared.listeners.lock();
        if shared.closed.load(Ordering::SeqCst) {
            return;
        }
        let result = match listen(&shared, &multiplexer, source, query.clone()) {
            Err(error) if error.is_index_building() && query.order_by.is_some() => {
                tracing::info!(user = %user, source = source.as_str(), "index building, live query falls back to unordered");
                listen(&shared, &multiplexer, source, query.without_order())
            }
            other => other,
        };
        match result {
            Ok(listener) => registered.push(listener),
            Err(error) => {
                drop(registered);
                tracing::warn!(user = %user, source = source.as_str(), error = %error, "live subscription failed");
                shared.dispatch(FeedEvent::SourceError {
                    source,
                    error: Arc::new(error),
                });
            }
        }
    }
}

/// A consumer's view of one live feed
///
/// Closing or dropping the handle removes its listeners from the
/// multiplexer; the remote subscription ends when no other feed shares it.
pub struct FeedHandle {
    shared: Arc<FeedShared>,
    rx: watch::Receiver<FeedView>,
    multiplexer: Arc<SubscriptionMultiplexer>,
    refresh: Option<JoinHandle<()>>,
}

impl FeedHandle {
    /// Latest published view
    #[must_use]
    pub fn view(&self) -> FeedView {
        self.rx.borrow().clone()
    }

    /// Wait for the next published view
    ///
    /// # Errors
    /// Returns [`SyncError::FeedClosed`] once the feed is closed.
    pub async fn changed(&mut self) -> Result<FeedView, SyncError> {
        if self.is_closed() {
            return Err(SyncError::FeedClosed);
        }
        self.rx.changed().await.map_err(|_| SyncError::FeedClosed)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Wait until a view satisfies `pred`, returning it
    ///
    /// # Errors
    /// Returns [`SyncError::FeedClosed`] if the feed closes first.
    pub async fn wait_for(&mut self, pred: impl Fn(&FeedView) -> bool) -> Result<FeedView, SyncError> {
        loop {
            let current = self.rx.borrow_and_update().clone();
            if pred(&current) {
                return Ok(current);
            }
            self.changed().await?;
        }
    }

    /// Owner of the feed
    #[inline]
    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.shared.user
    }

    /// Role of the feed
    #[inline]
    #[must_use]
    pub fn role(&self) -> RecipientRole {
        self.shared.role
    }

    /// Whether the feed was closed
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Stop receiving changes
    pub fn close(&mut self) {
        if let Some(task) = self.refresh.take() {
            task.abort();
        }
        self.shared.close(&self.multiplexer);
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FeedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedHandle")
            .field("user", &self.shared.user)
            .field("role", &self.shared.role)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Entry point for notification consumers
pub struct NotificationCenter {
    config: SyncConfig,
    aggregator: Arc<Aggregator>,
    reconciler: Arc<ReadStateReconciler>,
    counter: UnreadCounter,
    multiplexer: Arc<SubscriptionMultiplexer>,
    feeds: Mutex<Vec<Weak<FeedShared>>>,
}

impl NotificationCenter {
    /// Build a center over the given stores
    ///
    /// # Errors
    /// Returns [`SyncError::Config`] if `config` does not validate.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        Self::with_clock(remote, local, config, Arc::new(SystemClock))
    }

    /// Build a center whose cache reads `clock`
    ///
    /// # Errors
    /// Returns [`SyncError::Config`] if `config` does not validate.
    pub fn with_clock(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let aggregator = Arc::new(Aggregator::with_clock(remote.clone(), &config, clock));
        let reconciler = Arc::new(ReadStateReconciler::new(remote.clone(), local, &config));
        let counter = UnreadCounter::new(aggregator.clone(), reconciler.clone(), &config);
        tracing::info!(
            collection = %config.collection,
            list_limit = config.list_limit,
            badge_limit = config.badge_limit,
            "notification center ready"
        );
        Ok(Self {
            config,
            aggregator,
            reconciler,
            counter,
            multiplexer: Arc::new(SubscriptionMultiplexer::new(remote)),
            feeds: Mutex::new(Vec::new()),
        })
    }

    /// Open a live feed
    ///
    /// The handle starts with the cached list (marked stale) or an empty
    /// stale view. A background task then fetches, rebases the feed on the
    /// result and registers live listeners for each sub-query.
    pub async fn open_feed(&self, user: &UserId, role: RecipientRole) -> FeedHandle {
        let acks = self.reconciler.effective_acks(user, role).await;
        let mut state = FeedState::new(
            role,
            self.config.collection.clone(),
            self.config.list_limit,
            self.aggregator.rules().clone(),
            acks,
        );
        if let Some(cached) = self.aggregator.fetch_cached(user, role, self.config.list_limit) {
            state = state.with_baseline(cached, true);
        }

        let (tx, rx) = watch::channel(state.view().clone());
        let shared = Arc::new(FeedShared {
            user: user.clone(),
            role,
            state: Mutex::new(Some(state)),
            tx,
            reconciler: self.reconciler.clone(),
            listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        {
            let mut feeds = self.feeds.lock();
            feeds.retain(|f| f.strong_count() > 0);
            feeds.push(Arc::downgrade(&shared));
        }

        let refresh = tokio::spawn(refresh(
            shared.clone(),
            self.aggregator.clone(),
            self.multiplexer.clone(),
        ));
        tracing::debug!(user = %user, role = %role, "feed opened");
        FeedHandle {
            shared,
            rx,
            multiplexer: self.multiplexer.clone(),
            refresh: Some(refresh),
        }
    }

    /// One-shot list-screen view
    pub async fn list(&self, user: &UserId, role: RecipientRole) -> FeedView {
        self.counter.list(user, role).await
    }

    /// Unread badge count
    pub async fn badge_count(&self, user: &UserId, role: RecipientRole) -> usize {
        self.counter.badge(user, role).await
    }

    /// Bounded list for the startup path
    ///
    /// If the fetch and ack load do not finish within the startup timeout,
    /// the cached list reconciled against session acks is returned (or an
    /// empty stale view).
    pub async fn startup_view(&self, user: &UserId, role: RecipientRole) -> FeedView {
        let bound = self.config.startup_timeout();
        match tokio::time::timeout(bound, self.counter.list(user, role)).await {
            Ok(view) => view,
            Err(_) => {
                tracing::warn!(
                    user = %user,
                    role = %role,
                    timeout_ms = self.config.startup_timeout_ms,
                    "startup fetch timed out, serving cached list"
                );
                match self.aggregator.fetch_cached(user, role, self.config.list_limit) {
                    Some(cached) => {
                        FeedView::new(self.reconciler.reconcile_with_session(cached, user, role), true)
                    }
                    None => FeedView::empty_stale(),
                }
            }
        }
    }

    /// Mark one notification read
    ///
    /// Returns `true` if the remote flag or the local ack persisted.
    pub async fn mark_read(&self, id: &NotificationId, user: &UserId, role: RecipientRole) -> bool {
        let persisted = self.reconciler.mark_read(id, user, role).await;
        self.aggregator.invalidate(user, role);
        self.broadcast_acks(user, role, [id.clone()].into_iter().collect());
        persisted
    }

    /// Mark every unread item of `list` read
    pub async fn mark_all_read(
        &self,
        list: &[Notification],
        user: &UserId,
        role: RecipientRole,
    ) -> MarkAllOutcome {
        let outcome = self.reconciler.mark_all_read(list, user, role).await;
        self.aggregator.invalidate(user, role);
        self.broadcast_acks(user, role, list.iter().map(|n| n.id.clone()).collect());
        outcome
    }

    /// Forget everything held for the previous identity
    ///
    /// Clears its persisted ack set, resets its session read set and drops
    /// its cached lists.
    ///
    /// # Errors
    /// Returns the local store error if the ack set could not be cleared;
    /// session and cache state are reset regardless.
    pub async fn switch_identity(
        &self,
        previous_user: &UserId,
        previous_role: RecipientRole,
    ) -> Result<(), SyncError> {
        self.reconciler.reset(previous_user, previous_role);
        let dropped = self.aggregator.invalidate(previous_user, previous_role);
        tracing::info!(user = %previous_user, role = %previous_role, dropped, "identity switched");
        self.reconciler.acks().clear(previous_user, previous_role).await
    }

    /// Evict expired cache entries
    pub fn sweep_cache(&self) -> usize {
        self.aggregator.cache().sweep()
    }

    /// Cache counters
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.aggregator.cache().stats()
    }

    /// Subscription registry
    #[inline]
    #[must_use]
    pub fn multiplexer(&self) -> &SubscriptionMultiplexer {
        &self.multiplexer
    }

    /// Read-state reconciler
    #[inline]
    #[must_use]
    pub fn reconciler(&self) -> &ReadStateReconciler {
        &self.reconciler
    }

    /// Effective configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Number of open feeds
    #[must_use]
    pub fn open_feeds(&self) -> usize {
        self.feeds
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|f| !f.closed.load(Ordering::SeqCst))
            .count()
    }

    /// Close every feed and cancel every live subscription
    pub fn shutdown(&self) {
        let feeds: Vec<_> = self.feeds.lock().drain(..).collect();
        for feed in feeds.iter().filter_map(Weak::upgrade) {
            feed.close(&self.multiplexer);
        }
        self.multiplexer.shutdown();
    }

    fn broadcast_acks(&self, user: &UserId, role: RecipientRole, acks: AckSet) {
        let targets: Vec<_> = self
            .feeds
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|f| f.is_for(user, role))
            .collect();
        for feed in targets {
            feed.dispatch(FeedEvent::AckChanged(acks.clone()));
        }
    }
}

impl std::fmt::Debug for NotificationCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationCenter")
            .field("config", &self.config)
            .field("multiplexer", &self.multiplexer)
            .field("open_feeds", &self.open_feeds())
            .finish_non_exhaustive()
    }
}
