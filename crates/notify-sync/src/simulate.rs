//! Seeded end-to-end simulation
//!
//! Populates an in-memory remote store with current and legacy records for
//! a set of students and clubs, then drives the list and badge pipelines of
//! one [`NotificationCenter`] per run. Checked for every identity:
//! - the badge equals the unread count of the list's leading badge window
//! - the list is exactly the newest visible records the identity was seeded
//!   with, cut to the list window
//! - the list has no duplicate ids and is sorted newest first
//! - legacy records only reach club lists
//! - items marked read stay read and the unread count drops accordingly

use crate::center::NotificationCenter;
use crate::config::SyncConfig;
use crate::counter::count_unread;
use crate::error::SyncError;
use crate::feed::FeedView;
use crate::memory::{InMemoryLocalStore, InMemoryRemoteStore};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use notify_model::{newest_first, Document, NotificationId, RecipientRole, UserId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const KINDS: [&str; 5] = [
    "event_created",
    "member_joined",
    "event_reminder",
    "club_update",
    "registration_confirmed",
];

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Student identities
    pub students: usize,
    /// Club identities
    pub clubs: usize,
    /// Records seeded per identity
    pub notifications: usize,
    /// Share of club records written without the role discriminator
    pub legacy_ratio: f64,
    /// Share of records already read remotely
    pub read_ratio: f64,
    /// Share of records tagged with an excluded type
    pub excluded_ratio: f64,
    /// Share of current club records tagged with `recipientType` only
    pub alias_ratio: f64,
    /// Student records addressed to each club id, never listed for the club
    pub cross_role: usize,
    /// Items to mark read per identity
    pub mark_read: usize,
    /// Stop at the first violation
    pub stop_on_first_violation: bool,
    /// Engine configuration
    pub sync: SyncConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            students: 3,
            clubs: 3,
            notifications: 40,
            legacy_ratio: 0.3,
            read_ratio: 0.2,
            excluded_ratio: 0.1,
            alias_ratio: 0.1,
            cross_role: 10,
            mark_read: 5,
            stop_on_first_violation: false,
            sync: SyncConfig::default(),
        }
    }
}

/// A violation detected during simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Badge disagrees with the list screen
    BadgeMismatch {
        user: UserId,
        role: RecipientRole,
        badge: usize,
        list_window: usize,
    },
    /// List differs from the newest visible seeded records
    WrongWindow {
        user: UserId,
        expected: usize,
        listed: usize,
        mismatched: usize,
    },
    /// Same id listed twice
    DuplicateId { user: UserId, id: NotificationId },
    /// List not sorted newest first
    Unsorted { user: UserId },
    /// Legacy record in a student list
    LegacyLeak { user: UserId, id: NotificationId },
    /// Item marked read shows up unread
    ReadRegressed { user: UserId, id: NotificationId },
    /// Unread count did not drop by the number of items marked
    UnreadNotReduced {
        user: UserId,
        before: usize,
        after: usize,
        marked: usize,
    },
}

/// Per-identity outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityReport {
    /// User id
    pub user: UserId,
    /// Role
    pub role: RecipientRole,
    /// Items in the list window
    pub listed: usize,
    /// Legacy items in the list window
    pub legacy: usize,
    /// Unread before marking
    pub unread_before: usize,
    /// Unread after marking
    pub unread_after: usize,
    /// Badge after marking
    pub badge: usize,
}

/// Statistics for simulation
#[derive(Debug, Clone, Default)]
pub struct SimulatorStats {
    pub identities: usize,
    pub seeded: usize,
    pub seeded_legacy: usize,
    pub seeded_read: usize,
    /// Records with an excluded type or addressed to the other role
    pub seeded_hidden: usize,
    /// Club records tagged with `recipientType` only
    pub seeded_alias: usize,
    /// Current club records also returned by the legacy sub-query
    pub overlapping: usize,
    pub marked_read: usize,
    pub mark_read_failures: usize,
    pub badge_checks: usize,
}

/// Final report from simulator
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub stats: SimulatorStats,
    pub identities: Vec<IdentityReport>,
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Notification Sync Simulation ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Identities: {}\n", self.stats.identities));
        report.push_str(&format!(
            "Seeded: {} ({} legacy, {} alias, {} hidden, {} read)\n",
            self.stats.seeded, self.stats.seeded_legacy, self.stats.seeded_alias, self.stats.seeded_hidden, self.stats.seeded_read
        ));
        report.push_str(&format!("Overlapping: {}\n", self.stats.overlapping));
        report.push_str(&format!("Marked Read: {} ({} failed)\n", self.stats.marked_read, self.stats.mark_read_failures));
        report.push_str(&format!("Badge Checks: {}\n", self.stats.badge_checks));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));

        report.push_str("\n=== Identities ===\n");
        for r in &self.identities {
            report.push_str(&format!(
                "{:<8} {:<7} listed={:<4} legacy={:<4} unread={} -> {} badge={}\n",
                r.user.as_str(),
                r.role.as_str(),
                r.listed,
                r.legacy,
                r.unread_before,
                r.unread_after,
                r.badge
            ));
        }

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {:?}\n", i + 1, v));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }
}

/// Visible records per identity as `(createdAt ms, id)`
type Expected = HashMap<UserId, Vec<(i64, String)>>;

fn seed_store(
    config: &SimulatorConfig,
    rng: &mut StdRng,
    identities: &[(UserId, RecipientRole)],
    stats: &mut SimulatorStats,
) -> (InMemoryRemoteStore, Expected) {
    let remote = InMemoryRemoteStore::new();
    let mut expected = Expected::new();
    let read_ratio = config.read_ratio.clamp(0.0, 1.0);
    let legacy_ratio = config.legacy_ratio.clamp(0.0, 1.0);
    let excluded_ratio = config.excluded_ratio.clamp(0.0, 1.0);
    let alias_ratio = config.alias_ratio.clamp(0.0, 1.0);
    let excluded = config.sync.excluded_kinds.first().cloned();
    let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let collection = &config.sync.collection;

    for (user, role) in identities {
        let visible = expected.entry(user.clone()).or_default();
        for k in 0..config.notifications {
            let created = (base + ChronoDuration::seconds(rng.random_range(0..86_400))).timestamp_millis();
            let read = rng.random_bool(read_ratio);
            let id = format!("{}-{k:04}", user.as_str());
            let hidden_kind = excluded.as_deref().filter(|_| rng.random_bool(excluded_ratio));
            let kind = hidden_kind.unwrap_or(KINDS[rng.random_range(0..KINDS.len())]);
            let mut doc = Document::new(id.as_str())
                .with_field("recipientId", user.as_str())
                .with_field("type", kind)
                .with_field("title", "Simulated")
                .with_field("message", format!("notification {k}"))
                .with_field("createdAt", created)
                .with_field("read", read);

            if role.reads_legacy() && rng.random_bool(legacy_ratio) {
                stats.seeded_legacy += 1;
            } else if role.reads_legacy() && rng.random_bool(alias_ratio) {
                doc = doc.with_field("recipientType", role.as_str());
                stats.seeded_alias += 1;
            } else {
                doc = doc.with_field("recipientRole", role.as_str());
                if role.reads_legacy() {
                    stats.overlapping += 1;
                }
            }
            if hidden_kind.is_some() {
                stats.seeded_hidden += 1;
            } else {
                visible.push((created, id));
            }
            stats.seeded += 1;
            stats.seeded_read += usize::from(read);
            remote.insert(collection, doc);
        }

        if role.reads_legacy() {
            for k in 0..config.cross_role {
                let created = base + ChronoDuration::seconds(rng.random_range(0..86_400));
                let doc = Document::new(format!("{}-x{k:04}", user.as_str()))
                    .with_field("recipientId", user.as_str())
                    .with_field("recipientRole", RecipientRole::Student.as_str())
                    .with_field("type", KINDS[0])
                    .with_field("createdAt", created.timestamp_millis())
                    .with_field("read", false);
                stats.seeded += 1;
                stats.seeded_hidden += 1;
                remote.insert(collection, doc);
            }
        }
    }
    (remote, expected)
}

fn check_window(
    user: &UserId,
    view: &FeedView,
    visible: &[(i64, String)],
    limit: usize,
    violations: &mut Vec<Violation>,
) {
    let mut newest = visible.to_vec();
    newest.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    newest.truncate(limit);

    let listed: Vec<&str> = view.notifications.iter().map(|n| n.id.as_str()).collect();
    let mismatched = newest
        .iter()
        .zip(&listed)
        .filter(|((_, want), got)| want.as_str() != **got)
        .count()
        + newest.len().abs_diff(listed.len());
    if mismatched > 0 {
        violations.push(Violation::WrongWindow {
            user: user.clone(),
            expected: newest.len(),
            listed: listed.len(),
            mismatched,
        });
    }
}

fn check_list(user: &UserId, role: RecipientRole, view: &FeedView, violations: &mut Vec<Violation>) {
    let mut seen = HashSet::new();
    for n in &view.notifications {
        if !seen.insert(n.id.clone()) {
            violations.push(Violation::DuplicateId {
                user: user.clone(),
                id: n.id.clone(),
            });
        }
        if n.is_legacy() && !role.reads_legacy() {
            violations.push(Violation::LegacyLeak {
                user: user.clone(),
                id: n.id.clone(),
            });
        }
    }
    let sorted = view
        .notifications
        .windows(2)
        .all(|w| newest_first(&w[0], &w[1]) != Ordering::Greater);
    if !sorted {
        violations.push(Violation::Unsorted { user: user.clone() });
    }
}

async fn check_badge(
    center: &NotificationCenter,
    user: &UserId,
    role: RecipientRole,
    list: &FeedView,
    stats: &mut SimulatorStats,
    violations: &mut Vec<Violation>,
) -> usize {
    let badge = center.badge_count(user, role).await;
    let window = center.config().badge_limit.min(list.len());
    let list_window = count_unread(&list.notifications[..window]);
    stats.badge_checks += 1;
    if badge != list_window {
        violations.push(Violation::BadgeMismatch {
            user: user.clone(),
            role,
            badge,
            list_window,
        });
    }
    badge
}

/// Run the simulation
///
/// # Errors
/// Returns [`SyncError::Config`] if the engine configuration is invalid.
pub async fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, SyncError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stats = SimulatorStats::default();
    let mut violations = Vec::new();
    let mut reports = Vec::new();

    let mut identities = Vec::new();
    for i in 0..config.students {
        identities.push((UserId::new(format!("student{i}"))?, RecipientRole::Student));
    }
    for i in 0..config.clubs {
        identities.push((UserId::new(format!("club{i}"))?, RecipientRole::Club));
    }
    stats.identities = identities.len();

    let (remote, expected) = seed_store(&config, &mut rng, &identities, &mut stats);
    let center = NotificationCenter::new(
        Arc::new(remote),
        Arc::new(InMemoryLocalStore::new()),
        config.sync.clone(),
    )?;
    tracing::info!(seed = config.seed, identities = stats.identities, seeded = stats.seeded, "simulation seeded");

    for (user, role) in &identities {
        let (user, role) = (user, *role);
        let before = center.list(user, role).await;
        check_list(user, role, &before, &mut violations);
        let visible = expected.get(user).map_or(&[][..], Vec::as_slice);
        check_window(user, &before, visible, config.sync.list_limit, &mut violations);
        check_badge(&center, user, role, &before, &mut stats, &mut violations).await;

        let mut unread: Vec<NotificationId> = before
            .notifications
            .iter()
            .filter(|n| !n.read)
            .map(|n| n.id.clone())
            .collect();
        unread.shuffle(&mut rng);
        unread.truncate(config.mark_read);

        for id in &unread {
            if center.mark_read(id, user, role).await {
                stats.marked_read += 1;
            } else {
                stats.mark_read_failures += 1;
            }
        }

        let after = center.list(user, role).await;
        check_list(user, role, &after, &mut violations);
        for id in &unread {
            let regressed = after.notifications.iter().any(|n| &n.id == id && !n.read);
            if regressed {
                violations.push(Violation::ReadRegressed {
                    user: user.clone(),
                    id: id.clone(),
                });
            }
        }
        if after.unread + unread.len() != before.unread {
            violations.push(Violation::UnreadNotReduced {
                user: user.clone(),
                before: before.unread,
                after: after.unread,
                marked: unread.len(),
            });
        }
        let badge = check_badge(&center, user, role, &after, &mut stats, &mut violations).await;

        reports.push(IdentityReport {
            user: user.clone(),
            role,
            listed: after.len(),
            legacy: after.notifications.iter().filter(|n| n.is_legacy()).count(),
            unread_before: before.unread,
            unread_after: after.unread,
            badge,
        });

        if config.stop_on_first_violation && !violations.is_empty() {
            break;
        }
    }

    center.shutdown();
    Ok(SimulatorReport {
        config,
        stats,
        identities: reports,
        violations,
    })
}
