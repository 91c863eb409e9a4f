//! Notification data model
//!
//! Typed records for the notification synchronization engine.
//!
//! # Core Concepts
//!
//! - [`Document`]: untyped record as delivered by the remote store
//! - [`SchemaRecord`]: a document resolved once into `Current | Legacy`
//! - [`Notification`]: the resolved record every later stage consumes
//! - [`NotificationId`] / [`UserId`]: identity newtypes
//! - [`RecipientRole`]: the `student | club` discriminator
//!
//! # Example
//!
//! ```rust
//! use notify_model::{Document, Origin, RecipientRole, SchemaRecord};
//!
//! let doc = Document::new("aB3dE5fG7hJ9kL1mN3pQ")
//!     .with_field("recipientId", "club-1")
//!     .with_field("title", "New member");
//!
//! // No `recipientRole` field: legacy record, attributed to the club reader
//! let record = SchemaRecord::from_document(&doc, Origin::legacy("notifications")).unwrap();
//! assert!(record.is_legacy());
//! let notification = record.resolve(RecipientRole::Club);
//! assert_eq!(notification.recipient_role, RecipientRole::Club);
//! ```

#![warn(unreachable_pub)]

mod document;
mod error;
mod id;
mod notification;
mod record;
mod role;

pub use document::{parse_timestamp, Document};
pub use error::ModelError;
pub use id::{NotificationId, UserId};
pub use notification::{
    newest_first, sort_newest_first, ActionRef, Notification, Origin, SourceKind,
};
pub use record::{
    fields, normalize_kind, LegacyRecord, SchemaRecord, DEFAULT_MESSAGE, DEFAULT_TITLE,
    UNKNOWN_KIND,
};
pub use role::RecipientRole;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
