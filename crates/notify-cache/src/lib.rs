//! Query result cache
//!
//! A bounded, short-TTL cache keyed by query identity. Screens read it for an
//! immediate first paint and overwrite it once a fresh fetch completes.
//!
//! # Example
//!
//! ```rust
//! use notify_cache::{ManualClock, QueryCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = Arc::new(ManualClock::new());
//! let cache: QueryCache<Vec<String>> =
//!     QueryCache::with_clock(100, Duration::from_secs(30), clock.clone());
//!
//! cache.set("notifications:club:c1:100", vec!["n1".into()], Duration::from_millis(100));
//! assert!(cache.get("notifications:club:c1:100").is_some());
//!
//! clock.advance(Duration::from_millis(150));
//! assert!(cache.get("notifications:club:c1:100").is_none());
//! ```

#![warn(unreachable_pub)]

mod cache;
mod clock;

pub use cache::{CacheEntry, CacheStats, QueryCache, DEFAULT_CAPACITY, DEFAULT_TTL};
pub use clock::{Clock, ManualClock, SystemClock};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
