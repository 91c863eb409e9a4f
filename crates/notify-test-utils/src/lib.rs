//! Testing utilities for the notification sync workspace
//!
//! Shared fixtures: document builders for both record schemas, seeded
//! in-memory stores and center factories.

#![allow(missing_docs)]

use notify_cache::Clock;
use notify_model::{Document, Notification, NotificationId, UserId};
use notify_sync::{InMemoryLocalStore, InMemoryRemoteStore, NotificationCenter, SyncConfig};
use std::sync::{Arc, Once};

pub const COLLECTION: &str = "notifications";

/// Base timestamp for fixtures (2023-11-14T22:13:20Z), in seconds
pub const BASE_SECS: i64 = 1_700_000_000;

static TRACING: Once = Once::new();

/// Route engine logs to the test writer (`RUST_LOG` controls the level)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

pub fn nid(id: &str) -> NotificationId {
    NotificationId::new(id)
}

/// Millisecond timestamp `offset` seconds after [`BASE_SECS`]
pub fn at(offset: i64) -> i64 {
    (BASE_SECS + offset) * 1000
}

fn base_doc(id: &str, recipient: &str, offset: i64) -> Document {
    Document::new(id)
        .with_field("recipientId", recipient)
        .with_field("type", "event_created")
        .with_field("title", "Title")
        .with_field("message", "Message")
        .with_field("createdAt", at(offset))
        .with_field("read", false)
}

/// Current-schema record addressed to a club
pub fn club_doc(id: &str, club: &str, offset: i64) -> Document {
    base_doc(id, club, offset).with_field("recipientRole", "club")
}

/// Current-schema record addressed to a student
pub fn student_doc(id: &str, student: &str, offset: i64) -> Document {
    base_doc(id, student, offset).with_field("recipientRole", "student")
}

/// Record without the role discriminator
pub fn legacy_doc(id: &str, recipient: &str, offset: i64) -> Document {
    base_doc(id, recipient, offset)
}

/// Same record, already read remotely
pub fn read(doc: Document) -> Document {
    doc.with_field("read", true)
}

/// Same record with another type tag
pub fn kind(doc: Document, kind: &str) -> Document {
    doc.with_field("type", kind)
}

pub fn ids(list: &[Notification]) -> Vec<String> {
    list.iter().map(|n| n.id.as_str().to_string()).collect()
}

/// In-memory stores plus a configuration, ready to build centers
#[derive(Debug, Clone)]
pub struct Fixture {
    pub remote: InMemoryRemoteStore,
    pub local: InMemoryLocalStore,
    pub config: SyncConfig,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        init_tracing();
        Self {
            remote: InMemoryRemoteStore::new(),
            local: InMemoryLocalStore::new(),
            config,
        }
    }

    pub fn seed(&self, docs: impl IntoIterator<Item = Document>) -> &Self {
        self.remote.insert_many(&self.config.collection, docs);
        self
    }

    pub fn center(&self) -> NotificationCenter {
        NotificationCenter::new(
            Arc::new(self.remote.clone()),
            Arc::new(self.local.clone()),
            self.config.clone(),
        )
        .unwrap()
    }

    pub fn center_with_clock(&self, clock: Arc<dyn Clock>) -> NotificationCenter {
        NotificationCenter::with_clock(
            Arc::new(self.remote.clone()),
            Arc::new(self.local.clone()),
            self.config.clone(),
            clock,
        )
        .unwrap()
    }
}
