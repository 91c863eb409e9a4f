//! Notification synchronization engine
//!
//! Keeps a client's view of its notifications consistent across a live
//! remote store and a local acknowledgment store:
//! 1. **Multiplexing**: one remote subscription per query, shared by every listener
//! 2. **Aggregation**: role-scoped plus legacy sub-queries merged into one sorted window
//! 3. **Reconciliation**: `read = remote.read OR acknowledged`, monotonic per session
//! 4. **Counting**: badge and list share one counting pipeline
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use notify_sync::prelude::*;
//! use std::sync::Arc;
//!
//! let center = NotificationCenter::new(
//!     Arc::new(InMemoryRemoteStore::new()),
//!     Arc::new(InMemoryLocalStore::new()),
//!     SyncConfig::default(),
//! )?;
//!
//! let user = UserId::new("club-1")?;
//! let mut feed = center.open_feed(&user, RecipientRole::Club).await;
//! let view = feed.changed().await?;
//! println!("{} unread", view.unread);
//!
//! center.mark_read(&view.notifications[0].id, &user, RecipientRole::Club).await;
//! ```

#![warn(unreachable_pub)]

pub mod ack;
pub mod aggregator;
pub mod center;
pub mod config;
pub mod counter;
pub mod error;
pub mod feed;
pub mod file_store;
pub mod memory;
pub mod multiplexer;
pub mod reconciler;
pub mod simulate;
pub mod store;

// Re-exports
pub use ack::{AckLoad, AckSet, AckStore, Hygiene};
pub use aggregator::{Aggregator, DegradeReason, DegradedSource, FetchOutcome, MergeRules};
pub use center::{FeedHandle, NotificationCenter};
pub use config::SyncConfig;
pub use counter::{count_unread, UnreadCounter};
pub use error::{LocalStoreError, StoreError, StoreErrorCode, SyncError};
pub use feed::{FeedEvent, FeedState, FeedView};
pub use file_store::FileLocalStore;
pub use memory::{InMemoryLocalStore, InMemoryRemoteStore};
pub use multiplexer::{ChangeEvent, ListenerId, SubscriptionMultiplexer, SubscriptionState};
pub use reconciler::{merge_read_state, MarkAllOutcome, ReadStateReconciler};
pub use store::{LocalStore, Query, QuerySignature, RemoteStore};

/// Commonly used types
pub mod prelude {
    pub use crate::center::{FeedHandle, NotificationCenter};
    pub use crate::config::SyncConfig;
    pub use crate::error::{StoreError, SyncError};
    pub use crate::feed::FeedView;
    pub use crate::memory::{InMemoryLocalStore, InMemoryRemoteStore};
    pub use crate::store::{LocalStore, RemoteStore};
    pub use notify_model::{Notification, NotificationId, RecipientRole, UserId};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
