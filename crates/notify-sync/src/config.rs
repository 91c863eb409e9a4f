//! Engine configuration
//!
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! collection = "notifications"
//! cache_ttl_ms = 30000
//! list_limit = 100
//! ```

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Synchronization engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote collection holding notification records
    pub collection: String,
    /// Lifetime of cached query results in milliseconds
    pub cache_ttl_ms: u64,
    /// Maximum number of cached query results
    pub cache_capacity: u64,
    /// Window size for the full notification list
    pub list_limit: usize,
    /// Window size for the badge fetch
    pub badge_limit: usize,
    /// Records each sub-query reads before filtering and windowing
    pub scan_limit: usize,
    /// Bound on the blocking startup fetch in milliseconds
    pub startup_timeout_ms: u64,
    /// Attempts for a remote mark-as-read write
    pub mark_read_attempts: u32,
    /// Delay between mark-as-read attempts in milliseconds
    pub mark_read_retry_delay_ms: u64,
    /// Key prefix of persisted acknowledgment sets
    pub ack_key_prefix: String,
    /// Fraction of malformed ack entries above which the whole set is dropped
    pub malformed_reset_ratio: f64,
    /// Type tags never shown to users
    pub excluded_kinds: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            collection: "notifications".to_string(),
            cache_ttl_ms: 30_000,
            cache_capacity: 100,
            list_limit: 100,
            badge_limit: 50,
            scan_limit: 500,
            startup_timeout_ms: 5_000,
            mark_read_attempts: 3,
            mark_read_retry_delay_ms: 1_000,
            ack_key_prefix: "readNotifications".to_string(),
            malformed_reset_ratio: 0.5,
            excluded_kinds: ["debug", "test", "internal", "deprecated"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl SyncConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text and validate
    ///
    /// # Errors
    /// Returns [`SyncError::Config`] on malformed TOML or invalid values
    pub fn from_toml_str(text: &str) -> Result<Self, SyncError> {
        let config: Self = toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns [`SyncError::Config`] if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns [`SyncError::Config`] if serialization fails
    pub fn to_toml_string(&self) -> Result<String, SyncError> {
        toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns [`SyncError::Config`] naming the first invalid field
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.collection.trim().is_empty() {
            return Err(SyncError::Config("collection must not be empty".into()));
        }
        if self.list_limit == 0 || self.badge_limit == 0 {
            return Err(SyncError::Config("list and badge limits must be positive".into()));
        }
        if self.scan_limit < self.list_limit.max(self.badge_limit) {
            return Err(SyncError::Config(format!(
                "scan_limit ({}) must cover the list and badge windows",
                self.scan_limit
            )));
        }
        if self.mark_read_attempts == 0 {
            return Err(SyncError::Config("mark_read_attempts must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.malformed_reset_ratio) {
            return Err(SyncError::Config(format!(
                "malformed_reset_ratio must be within 0..=1, got {}",
                self.malformed_reset_ratio
            )));
        }
        if self.ack_key_prefix.trim().is_empty() {
            return Err(SyncError::Config("ack_key_prefix must not be empty".into()));
        }
        Ok(())
    }

    /// With collection name
    #[inline]
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// With cache TTL
    #[inline]
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = duration_ms(ttl);
        self
    }

    /// With cache capacity
    #[inline]
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// With list window
    #[inline]
    #[must_use]
    pub fn with_list_limit(mut self, limit: usize) -> Self {
        self.list_limit = limit;
        self
    }

    /// With badge window
    #[inline]
    #[must_use]
    pub fn with_badge_limit(mut self, limit: usize) -> Self {
        self.badge_limit = limit;
        self
    }

    /// With sub-query scan bound
    #[inline]
    #[must_use]
    pub fn with_scan_limit(mut self, limit: usize) -> Self {
        self.scan_limit = limit;
        self
    }

    /// With startup timeout
    #[inline]
    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_ms = duration_ms(timeout);
        self
    }

    /// With mark-as-read retry policy
    #[inline]
    #[must_use]
    pub fn with_mark_read_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.mark_read_attempts = attempts;
        self.mark_read_retry_delay_ms = duration_ms(delay);
        self
    }

    /// With ack key prefix
    #[inline]
    #[must_use]
    pub fn with_ack_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ack_key_prefix = prefix.into();
        self
    }

    /// With malformed-entry reset ratio
    #[inline]
    #[must_use]
    pub fn with_malformed_reset_ratio(mut self, ratio: f64) -> Self {
        self.malformed_reset_ratio = ratio;
        self
    }

    /// With excluded type tags
    #[must_use]
    pub fn with_excluded_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Cache TTL as a duration
    #[inline]
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Startup timeout as a duration
    #[inline]
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Mark-as-read retry delay as a duration
    #[inline]
    #[must_use]
    pub fn mark_read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.mark_read_retry_delay_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_documented_values() {
        let config = SyncConfig::default();
        assert_eq!(config.collection, "notifications");
        assert_eq!(config.cache_ttl(), Duration::from_secs(30));
        assert_eq!(config.cache_capacity, 100);
        assert_eq!(config.list_limit, 100);
        assert_eq!(config.badge_limit, 50);
        assert_eq!(config.scan_limit, 500);
        assert_eq!(config.mark_read_attempts, 3);
        assert_eq!(config.mark_read_retry_delay(), Duration::from_secs(1));
        assert!(config.excluded_kinds.contains(&"debug".to_string()));
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str("list_limit = 20\ncollection = \"inbox\"\n").unwrap();
        assert_eq!(config.list_limit, 20);
        assert_eq!(config.collection, "inbox");
        assert_eq!(config.badge_limit, 50);
    }

    #[test]
    fn invalid_values_rejected() {
        let err = SyncConfig::from_toml_str("malformed_reset_ratio = 1.5").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));

        let err = SyncConfig::from_toml_str("list_limit = 0").unwrap_err();
        assert!(err.to_string().contains("limits"));

        assert!(SyncConfig::from_toml_str("list_limit = \"many\"").is_err());
    }

    #[test]
    fn scan_limit_must_cover_windows() {
        let err = SyncConfig::from_toml_str("scan_limit = 80").unwrap_err();
        assert!(err.to_string().contains("scan_limit"));
        SyncConfig::default().with_scan_limit(100).validate().unwrap();
    }

    #[test]
    fn toml_round_trip() {
        let config = SyncConfig::new()
            .with_collection("clubNotifications")
            .with_startup_timeout(Duration::from_millis(250));
        let text = config.to_toml_string().unwrap();
        assert_eq!(SyncConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.toml");
        std::fs::write(&path, "badge_limit = 10\n").unwrap();
        assert_eq!(SyncConfig::load(&path).unwrap().badge_limit, 10);

        let missing = SyncConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, SyncError::Config(_)));
    }
}
