//! Recipient roles
//!
//! The discriminator carried by current-schema records. Legacy records have
//! no role at all; that absence is represented by
//! [`crate::SchemaRecord::Legacy`], never by an extra enum variant here.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Which kind of account a notification targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
    /// Student account
    Student,
    /// Club account
    Club,
}

impl RecipientRole {
    /// Wire value stored in the discriminator field
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Club => "club",
        }
    }

    /// Whether this role also reads legacy records lacking a discriminator
    #[inline]
    #[must_use]
    pub const fn reads_legacy(self) -> bool {
        matches!(self, Self::Club)
    }
}

impl Display for RecipientRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipientRole {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "club" => Ok(Self::Club),
            _ => Err(ModelError::UnknownRole(s.to_string())),
        }
    }
}
