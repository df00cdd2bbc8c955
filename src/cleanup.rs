//! Retention sweeps. Each sweep is independent; `run_cleanup` runs all three and
//! keeps going when one of them fails.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::config::CleanupConfig;
use crate::error::{ConfigError, StoreError};
use crate::models::EventStatus;
use crate::store::{EventFilter, EventStore, StatusAudit};

/// Statuses whose past events are purged.
pub const VISIBLE_STATUSES: [EventStatus; 3] = [
    EventStatus::Approved,
    EventStatus::Featured,
    EventStatus::Pending,
];

#[derive(Debug, Clone, PartialEq)]
pub struct CleanupPolicy {
    pub grace: Duration,
    pub denied_retention: Duration,
    pub actor: String,
    pub note: String,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        let config = CleanupConfig::default();
        Self {
            grace: Duration::hours(config.grace_hours),
            denied_retention: Duration::days(config.denied_retention_days),
            actor: config.actor,
            note: config.note,
        }
    }
}

impl TryFrom<&CleanupConfig> for CleanupPolicy {
    type Error = ConfigError;

    fn try_from(config: &CleanupConfig) -> Result<Self, Self::Error> {
        config.validate()?;
        let overflow = |field: &'static str| ConfigError::InvalidCleanup {
            field,
            reason: "window overflows".to_string(),
        };
        Ok(Self {
            grace: Duration::try_hours(config.grace_hours).ok_or_else(|| overflow("grace_hours"))?,
            denied_retention: Duration::try_days(config.denied_retention_days)
                .ok_or_else(|| overflow("denied_retention_days"))?,
            actor: config.actor.clone(),
            note: config.note.clone(),
        })
    }
}

fn past_filter(now: DateTime<Utc>, policy: &CleanupPolicy) -> EventFilter {
    EventFilter::with_statuses(&VISIBLE_STATUSES).ended_before(now - policy.grace)
}

fn cancelled_filter(now: DateTime<Utc>, policy: &CleanupPolicy) -> EventFilter {
    EventFilter::with_statuses(&[EventStatus::Cancelled]).updated_before(now - policy.grace)
}

fn denied_filter(now: DateTime<Utc>, policy: &CleanupPolicy) -> EventFilter {
    EventFilter::with_statuses(&[EventStatus::Denied]).updated_before(now - policy.denied_retention)
}

pub fn purge_past_events<S: EventStore + ?Sized>(
    store: &mut S,
    now: DateTime<Utc>,
    policy: &CleanupPolicy,
) -> Result<usize, StoreError> {
    let deleted = store.delete_matching(&past_filter(now, policy))?;
    info!(deleted, "purged past events");
    Ok(deleted)
}

pub fn purge_cancelled_events<S: EventStore + ?Sized>(
    store: &mut S,
    now: DateTime<Utc>,
    policy: &CleanupPolicy,
) -> Result<usize, StoreError> {
    let deleted = store.delete_matching(&cancelled_filter(now, policy))?;
    info!(deleted, "purged cancelled events");
    Ok(deleted)
}

pub fn archive_denied_events<S: EventStore + ?Sized>(
    store: &mut S,
    now: DateTime<Utc>,
    policy: &CleanupPolicy,
) -> Result<usize, StoreError> {
    let audit = StatusAudit {
        at: now,
        actor: policy.actor.clone(),
        note: policy.note.clone(),
    };
    let archived =
        store.transition_matching(&denied_filter(now, policy), EventStatus::Archived, &audit)?;
    info!(archived, "archived denied events");
    Ok(archived)
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub archived: usize,
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn run_cleanup<S: EventStore + ?Sized>(
    store: &mut S,
    now: DateTime<Utc>,
    policy: &CleanupPolicy,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    match purge_past_events(store, now, policy) {
        Ok(n) => report.deleted += n,
        Err(err) => {
            error!(error = %err, "past-event purge failed");
            report.errors.push(format!("past-event purge failed: {err}"));
        }
    }
    match purge_cancelled_events(store, now, policy) {
        Ok(n) => report.deleted += n,
        Err(err) => {
            error!(error = %err, "cancelled-event purge failed");
            report.errors.push(format!("cancelled-event purge failed: {err}"));
        }
    }
    match archive_denied_events(store, now, policy) {
        Ok(n) => report.archived += n,
        Err(err) => {
            error!(error = %err, "denied-event archival failed");
            report.errors.push(format!("denied-event archival failed: {err}"));
        }
    }

    info!(
        deleted = report.deleted,
        archived = report.archived,
        errors = report.errors.len(),
        "cleanup finished"
    );
    report
}

/// Rows each sweep would touch right now.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStats {
    pub past_events: usize,
    pub old_cancelled_events: usize,
    pub old_denied_events: usize,
}

pub fn cleanup_stats<S: EventStore + ?Sized>(
    store: &S,
    now: DateTime<Utc>,
    policy: &CleanupPolicy,
) -> Result<CleanupStats, StoreError> {
    Ok(CleanupStats {
        past_events: store.count_matching(&past_filter(now, policy))?,
        old_cancelled_events: store.count_matching(&cancelled_filter(now, policy))?,
        old_denied_events: store.count_matching(&denied_filter(now, policy))?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{SecondsFormat, TimeZone};

    use super::*;
    use crate::db::Store;
    use crate::models::StoredEvent;
    use crate::store::fixtures::{event, stored};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn ending_at(id: &str, end: DateTime<Utc>, status: EventStatus) -> StoredEvent {
        let text = end.to_rfc3339_opts(SecondsFormat::Secs, true);
        stored(id, event(&format!("src_{id}"), id, &text), status, now())
    }

    #[test]
    fn policy_rejects_negative_grace() {
        let config = CleanupConfig {
            grace_hours: -1,
            ..CleanupConfig::default()
        };
        assert!(matches!(
            CleanupPolicy::try_from(&config),
            Err(ConfigError::InvalidCleanup { field: "grace_hours", .. })
        ));
    }

    #[test]
    fn policy_rejects_huge_retention_without_panicking() {
        let config = CleanupConfig {
            denied_retention_days: i64::MAX,
            ..CleanupConfig::default()
        };
        assert!(CleanupPolicy::try_from(&config).is_err());
    }

    #[test]
    fn policy_from_default_config_matches_default() {
        let policy = CleanupPolicy::try_from(&CleanupConfig::default()).expect("policy");
        assert_eq!(policy, CleanupPolicy::default());
    }

    #[test]
    fn past_purge_boundary_is_one_second_wide() {
        let mut store = Store::open_in_memory().expect("store");
        let policy = CleanupPolicy::default();
        let cutoff = now() - policy.grace;
        store
            .insert(&ending_at("old", cutoff - Duration::seconds(1), EventStatus::Approved))
            .expect("insert");
        store
            .insert(&ending_at("recent", cutoff + Duration::seconds(1), EventStatus::Approved))
            .expect("insert");

        let deleted = purge_past_events(&mut store, now(), &policy).expect("purge");
        assert_eq!(deleted, 1);
        let remaining = store.list().expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "recent");
    }

    #[test]
    fn past_purge_skips_terminal_statuses() {
        let mut store = Store::open_in_memory().expect("store");
        let long_ago = now() - Duration::days(30);
        store
            .insert(&ending_at("archived", long_ago, EventStatus::Archived))
            .expect("insert");
        store
            .insert(&ending_at("denied", long_ago, EventStatus::Denied))
            .expect("insert");
        store
            .insert(&ending_at("pending", long_ago, EventStatus::Pending))
            .expect("insert");

        let deleted = purge_past_events(&mut store, now(), &CleanupPolicy::default()).expect("purge");
        assert_eq!(deleted, 1);
        assert!(store.find_by_external_id("src_pending").expect("lookup").is_none());
    }

    #[test]
    fn cancelled_purge_uses_last_update() {
        let mut store = Store::open_in_memory().expect("store");
        let future = Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap();
        let mut stale = ending_at("stale", future, EventStatus::Cancelled);
        stale.updated_at = now() - Duration::days(2);
        let mut fresh = ending_at("fresh", future, EventStatus::Cancelled);
        fresh.updated_at = now() - Duration::hours(2);
        store.insert(&stale).expect("insert");
        store.insert(&fresh).expect("insert");

        let deleted =
            purge_cancelled_events(&mut store, now(), &CleanupPolicy::default()).expect("purge");
        assert_eq!(deleted, 1);
        assert!(store.find_by_external_id("src_fresh").expect("lookup").is_some());
    }

    #[test]
    fn denied_rows_are_archived_with_audit() {
        let mut store = Store::open_in_memory().expect("store");
        let future = Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap();
        let mut old = ending_at("old", future, EventStatus::Denied);
        old.updated_at = now() - Duration::days(8);
        let mut young = ending_at("young", future, EventStatus::Denied);
        young.updated_at = now() - Duration::days(6);
        store.insert(&old).expect("insert");
        store.insert(&young).expect("insert");

        let policy = CleanupPolicy::default();
        let stats = cleanup_stats(&store, now(), &policy).expect("stats");
        assert_eq!(stats.old_denied_events, 1);

        let report = run_cleanup(&mut store, now(), &policy);
        assert_eq!(report, CleanupReport { deleted: 0, archived: 1, errors: Vec::new() });

        let archived = store.find_by_external_id("src_old").expect("lookup").expect("row");
        assert_eq!(archived.status, EventStatus::Archived);
        assert_eq!(archived.updated_by, policy.actor);
        assert_eq!(archived.updated_at, now());
        assert_eq!(archived.notes.as_deref(), Some(policy.note.as_str()));

        let untouched = store.find_by_external_id("src_young").expect("lookup").expect("row");
        assert_eq!(untouched.status, EventStatus::Denied);
    }

    #[test]
    fn stats_do_not_mutate() {
        let mut store = Store::open_in_memory().expect("store");
        store
            .insert(&ending_at("old", now() - Duration::days(3), EventStatus::Featured))
            .expect("insert");
        let stats = cleanup_stats(&store, now(), &CleanupPolicy::default()).expect("stats");
        assert_eq!(stats.past_events, 1);
        assert_eq!(store.list().expect("list").len(), 1);
    }

    struct BrokenDeletes(Store);

    impl EventStore for BrokenDeletes {
        fn find_by_external_id(&self, id: &str) -> Result<Option<StoredEvent>, StoreError> {
            self.0.find_by_external_id(id)
        }
        fn find_by_natural_key(
            &self,
            name: &str,
            start: &chrono::DateTime<chrono::FixedOffset>,
            community_id: &str,
        ) -> Result<Option<StoredEvent>, StoreError> {
            self.0.find_by_natural_key(name, start, community_id)
        }
        fn insert(&mut self, record: &StoredEvent) -> Result<(), StoreError> {
            self.0.insert(record)
        }
        fn update(&mut self, record: &StoredEvent) -> Result<(), StoreError> {
            self.0.update(record)
        }
        fn delete_matching(&mut self, _: &EventFilter) -> Result<usize, StoreError> {
            Err(StoreError::NotFound("delete".to_string()))
        }
        fn count_matching(&self, filter: &EventFilter) -> Result<usize, StoreError> {
            self.0.count_matching(filter)
        }
        fn transition_matching(
            &mut self,
            filter: &EventFilter,
            to: EventStatus,
            audit: &StatusAudit,
        ) -> Result<usize, StoreError> {
            self.0.transition_matching(filter, to, audit)
        }
        fn list(&self) -> Result<Vec<StoredEvent>, StoreError> {
            self.0.list()
        }
    }

    #[test]
    fn failing_sweep_does_not_stop_the_others() {
        let mut inner = Store::open_in_memory().expect("store");
        let future = Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap();
        let mut denied = ending_at("denied", future, EventStatus::Denied);
        denied.updated_at = now() - Duration::days(10);
        inner.insert(&denied).expect("insert");

        let mut store = BrokenDeletes(inner);
        let report = run_cleanup(&mut store, now(), &CleanupPolicy::default());
        assert_eq!(report.deleted, 0);
        assert_eq!(report.archived, 1);
        assert_eq!(report.errors.len(), 2);
        assert!(!report.is_clean());
    }
}
