//! Schema-variant resolution
//!
//! Remote records come in two shapes: the current schema, which carries a
//! `recipientRole` discriminator, and the legacy schema, which does not.
//! [`SchemaRecord::from_document`] decides which one a document is exactly
//! once, at ingestion. Field defaults and known tag misspellings are fixed
//! here as well so later stages never re-inspect raw fields.

use crate::document::{parse_timestamp, Document};
use crate::error::ModelError;
use crate::id::{NotificationId, UserId};
use crate::notification::{ActionRef, Notification, Origin};
use crate::role::RecipientRole;
use chrono::{DateTime, Utc};

/// Field names used by the remote schema
pub mod fields {
    /// Discriminator written by current clients
    pub const RECIPIENT_ROLE: &str = "recipientRole";
    /// Older spelling of the discriminator
    pub const RECIPIENT_TYPE: &str = "recipientType";
    /// Recipient account
    pub const RECIPIENT_ID: &str = "recipientId";
    /// Actor / fallback recipient
    pub const USER_ID: &str = "userId";
    /// Type tag
    pub const TYPE: &str = "type";
    /// Title
    pub const TITLE: &str = "title";
    /// Message body
    pub const MESSAGE: &str = "message";
    /// Push-style body, used when `message` is missing
    pub const BODY: &str = "body";
    /// Creation time
    pub const CREATED_AT: &str = "createdAt";
    /// Older creation-time field
    pub const TIMESTAMP: &str = "timestamp";
    /// Read flag
    pub const READ: &str = "read";
    /// Read acknowledgment time
    pub const READ_AT: &str = "readAt";
    /// Related event
    pub const EVENT_ID: &str = "eventId";
    /// Related club
    pub const CLUB_ID: &str = "clubId";
}

/// Title used when a record has none
pub const DEFAULT_TITLE: &str = "Notification";
/// Message used when a record has neither `message` nor `body`
pub const DEFAULT_MESSAGE: &str = "New notification";
/// Type tag used when a record has none
pub const UNKNOWN_KIND: &str = "unknown";

/// Misspelled type tags written by older clients
const KIND_CORRECTIONS: &[(&str, &str)] = &[("cclub_announcement", "club_announcement")];

/// Correct a known-misspelled type tag
#[must_use]
pub fn normalize_kind(kind: &str) -> &str {
    KIND_CORRECTIONS
        .iter()
        .find(|(wrong, _)| *wrong == kind)
        .map_or(kind, |(_, right)| right)
}

/// Fields shared by both schema variants
#[derive(Debug, Clone, PartialEq, Eq)]
struct CommonFields {
    id: NotificationId,
    recipient_id: UserId,
    kind: String,
    title: String,
    message: String,
    created_at: DateTime<Utc>,
    read: bool,
    origin: Origin,
    action: ActionRef,
}

impl CommonFields {
    fn extract(doc: &Document, origin: Origin) -> Result<Self, ModelError> {
        let recipient = doc
            .text_field(fields::RECIPIENT_ID)
            .or_else(|| doc.text_field(fields::USER_ID))
            .ok_or_else(|| ModelError::missing(doc.id.clone(), fields::RECIPIENT_ID))?;
        let recipient_id = UserId::new(recipient)?;

        let kind = doc
            .text_field(fields::TYPE)
            .map_or(UNKNOWN_KIND, normalize_kind)
            .to_string();

        let title = doc
            .text_field(fields::TITLE)
            .unwrap_or(DEFAULT_TITLE)
            .to_string();

        let message = doc
            .text_field(fields::MESSAGE)
            .or_else(|| doc.text_field(fields::BODY))
            .unwrap_or(DEFAULT_MESSAGE)
            .to_string();

        let created_at = doc
            .get(fields::CREATED_AT)
            .or_else(|| doc.get(fields::TIMESTAMP))
            .and_then(parse_timestamp)
            .or(doc.create_time)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let action = ActionRef {
            event_id: doc.text_field(fields::EVENT_ID).map(str::to_string),
            club_id: doc.text_field(fields::CLUB_ID).map(str::to_string),
            user_id: doc.text_field(fields::USER_ID).map(str::to_string),
        };

        Ok(Self {
            id: NotificationId::new(doc.id.clone()),
            recipient_id,
            kind,
            title,
            message,
            created_at,
            read: doc.bool_field(fields::READ).unwrap_or(false),
            origin,
            action,
        })
    }

    fn into_notification(self, role: RecipientRole) -> Notification {
        Notification {
            id: self.id,
            recipient_id: self.recipient_id,
            recipient_role: role,
            kind: self.kind,
            title: self.title,
            message: self.message,
            created_at: self.created_at,
            read: self.read,
            origin: self.origin,
            action: self.action,
        }
    }
}

/// A record lacking the role discriminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyRecord(CommonFields);

impl LegacyRecord {
    /// Record id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &NotificationId {
        &self.0.id
    }

    /// Creation time
    #[inline]
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.0.created_at
    }

    /// Attribute a role to this record, producing a full [`Notification`]
    #[must_use]
    pub fn attribute(self, role: RecipientRole) -> Notification {
        self.0.into_notification(role)
    }
}

/// A remote document resolved into one of the two schema variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaRecord {
    /// Record carrying the discriminator
    Current(Notification),
    /// Record without the discriminator
    Legacy(LegacyRecord),
}

impl SchemaRecord {
    /// Resolve a raw document
    ///
    /// `recipientRole` (or the older `recipientType`) decides the variant.
    /// A null discriminator counts as absent.
    ///
    /// # Errors
    /// - [`ModelError::MissingField`] if neither `recipientId` nor `userId` is set
    /// - [`ModelError::UnknownRole`] if the discriminator holds an unknown value
    /// - [`ModelError::MalformedField`] if the discriminator is not a string
    pub fn from_document(doc: &Document, origin: Origin) -> Result<Self, ModelError> {
        let discriminator = doc
            .get(fields::RECIPIENT_ROLE)
            .or_else(|| doc.get(fields::RECIPIENT_TYPE));

        let common = CommonFields::extract(doc, origin)?;

        match discriminator {
            None => Ok(Self::Legacy(LegacyRecord(common))),
            Some(value) => {
                let raw = value.as_str().ok_or_else(|| {
                    ModelError::malformed(
                        doc.id.clone(),
                        fields::RECIPIENT_ROLE,
                        format!("expected string, got {value}"),
                    )
                })?;
                let role: RecipientRole = raw.parse()?;
                Ok(Self::Current(common.into_notification(role)))
            }
        }
    }

    /// Record id regardless of variant
    #[inline]
    #[must_use]
    pub fn id(&self) -> &NotificationId {
        match self {
            Self::Current(n) => &n.id,
            Self::Legacy(l) => l.id(),
        }
    }

    /// Whether this is a legacy record
    #[inline]
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }

    /// Resolve into a [`Notification`], attributing `default_role` to legacy records
    #[must_use]
    pub fn resolve(self, default_role: RecipientRole) -> Notification {
        match self {
            Self::Current(n) => n,
            Self::Legacy(l) => l.attribute(default_role),
        }
    }
}
