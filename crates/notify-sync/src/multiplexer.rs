//! Subscription multiplexer
//!
//! Shares one live remote subscription per [`QuerySignature`] among any
//! number of listeners. The registry is a map from signature to a live
//! handle; a handle exists exactly while its listener set is non-empty.
//!
//! Add and remove both run under one registry lock and `subscribe` is
//! synchronous, so any interleaving of the two, including a remove
//! immediately followed by an add in the same tick, leaves exactly one
//! live subscription when listeners remain and none when they do not.
//!
//! Each handle owns its listener set and its forwarding task. Tearing a
//! handle down cancels the remote feed and aborts the task, so a re-created
//! handle for the same signature never receives deliveries meant for the
//! old one.
//!
//! Remote errors are broadcast to the current listeners. Nothing is retried
//! here; a caller that wants a fresh feed removes and re-adds its listener.

use crate::error::StoreError;
use crate::store::{Query, QuerySignature, RemoteStore, RemoteSubscription, SubscriptionGuard};
use indexmap::IndexMap;
use notify_model::Document;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use ulid::Ulid;

/// Event delivered to listeners
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// Full result snapshot
    Batch(Arc<Vec<Document>>),
    /// Remote failure on the shared feed
    Error(Arc<StoreError>),
}

/// Listener callback
pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Identity of one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(Ulid);

impl ListenerId {
    fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// No remote subscription
    Idle,
    /// Subscription open, nothing delivered yet
    Subscribing,
    /// At least one delivery received
    Active,
}

type ListenerSet = Arc<RwLock<IndexMap<ListenerId, ChangeCallback>>>;

struct LiveHandle {
    listeners: ListenerSet,
    delivered: Arc<AtomicBool>,
    guard: SubscriptionGuard,
    forwarder: JoinHandle<()>,
}

impl LiveHandle {
    fn teardown(self, signature: &QuerySignature) {
        self.guard.cancel();
        self.forwarder.abort();
        tracing::debug!(signature = %signature, "remote subscription cancelled");
    }
}

/// Reference-counted fan-out of remote subscriptions
pub struct SubscriptionMultiplexer {
    remote: Arc<dyn RemoteStore>,
    handles: Mutex<HashMap<QuerySignature, LiveHandle>>,
}

impl SubscriptionMultiplexer {
    /// Create a multiplexer over `remote`
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Register `callback` for `signature`
    ///
    /// Opens the remote subscription (using the query from `query_factory`)
    /// only when `signature` has no live handle; otherwise joins the existing
    /// one. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns the [`StoreError`] from `subscribe` if the subscription could
    /// not be opened; the signature stays idle and nothing is registered.
    pub fn add_listener<F>(
        &self,
        signature: &QuerySignature,
        callback: ChangeCallback,
        query_factory: F,
    ) -> Result<ListenerId, StoreError>
    where
        F: FnOnce() -> Query,
    {
        let id = ListenerId::generate();
        let mut handles = self.handles.lock();

        if let Some(handle) = handles.get(signature) {
            handle.listeners.write().insert(id, callback);
            tracing::trace!(signature = %signature, listener = %id, "joined live subscription");
            return Ok(id);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StoreError::internal(format!("no async runtime for subscription: {e}")))?;

        let query = query_factory();
        let RemoteSubscription { batches, guard } = self.remote.subscribe(&query)?;

        let listeners: ListenerSet = Arc::new(RwLock::new(IndexMap::new()));
        listeners.write().insert(id, callback);
        let delivered = Arc::new(AtomicBool::new(false));

        let forwarder = runtime.spawn(forward(
            signature.clone(),
            batches,
            listeners.clone(),
            delivered.clone(),
        ));

        handles.insert(
            signature.clone(),
            LiveHandle {
                listeners,
                delivered,
                guard,
                forwarder,
            },
        );
        tracing::debug!(signature = %signature, listener = %id, "remote subscription opened");
        Ok(id)
    }

    /// Unregister a listener
    ///
    /// Cancels the remote subscription when the last listener leaves.
    /// Returns `false` if the listener was not registered.
    pub fn remove_listener(&self, signature: &QuerySignature, id: ListenerId) -> bool {
        let mut handles = self.handles.lock();
        let Some(handle) = handles.get(signature) else {
            return false;
        };

        let (removed, now_empty) = {
            let mut listeners = handle.listeners.write();
            let removed = listeners.shift_remove(&id).is_some();
            (removed, listeners.is_empty())
        };

        if now_empty {
            if let Some(handle) = handles.remove(signature) {
                handle.teardown(signature);
            }
        }
        removed
    }

    /// Current lifecycle state of `signature`
    #[must_use]
    pub fn state(&self, signature: &QuerySignature) -> SubscriptionState {
        match self.handles.lock().get(signature) {
            None => SubscriptionState::Idle,
            Some(h) if h.delivered.load(Ordering::SeqCst) => SubscriptionState::Active,
            Some(_) => SubscriptionState::Subscribing,
        }
    }

    /// Listeners registered for `signature`
    #[must_use]
    pub fn listener_count(&self, signature: &QuerySignature) -> usize {
        self.handles
            .lock()
            .get(signature)
            .map_or(0, |h| h.listeners.read().len())
    }

    /// Number of live remote subscriptions
    #[must_use]
    pub fn live_subscriptions(&self) -> usize {
        self.handles.lock().len()
    }

    /// Signatures with a live subscription
    #[must_use]
    pub fn signatures(&self) -> Vec<QuerySignature> {
        let mut sigs: Vec<_> = self.handles.lock().keys().cloned().collect();
        sigs.sort();
        sigs
    }

    /// Cancel every live subscription
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.handles.lock().drain().collect();
        if !drained.is_empty() {
            tracing::info!(subscriptions = drained.len(), "multiplexer shutting down");
        }
        for (signature, handle) in drained {
            handle.teardown(&signature);
        }
    }
}

impl Drop for SubscriptionMultiplexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for SubscriptionMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionMultiplexer")
            .field("live_subscriptions", &self.live_subscriptions())
            .finish_non_exhaustive()
    }
}

async fn forward(
    signature: QuerySignature,
    mut batches: tokio::sync::mpsc::UnboundedReceiver<crate::store::SnapshotResult>,
    listeners: ListenerSet,
    delivered: Arc<AtomicBool>,
) {
    while let Some(item) = batches.recv().await {
        let event = match item {
            Ok(docs) => ChangeEvent::Batch(Arc::new(docs)),
            Err(error) => {
                tracing::warn!(signature = %signature, error = %error, "subscription error broadcast");
                ChangeEvent::Error(Arc::new(error))
            }
        };
        delivered.store(true, Ordering::SeqCst);

        // snapshot so callbacks may add/remove listeners re-entrantly
        let callbacks: Vec<ChangeCallback> = listeners.read().values().cloned().collect();
        for callback in callbacks {
            callback(&event);
        }
    }
    tracing::trace!(signature = %signature, "subscription feed closed");
}
