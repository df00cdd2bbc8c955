//! Merges freshly scraped events into an `EventStore`.
//!
//! Lookup order is exact external id, then the exact `(name, start, community)`
//! triple, then insert. Matches are point lookups: a one-character difference in the
//! name produces a separate row.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{unique_ordered, Event, EventStatus, StoredEvent};
use crate::store::EventStore;

pub const SCRAPER_ACTOR: &str = "system@scraper";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("event has an empty name")]
    EmptyName,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a source's new events enter the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePolicy {
    pub source: String,
    pub default_status: EventStatus,
    pub actor: String,
}

impl SourcePolicy {
    pub fn new(source: &str, auto_approve: bool) -> Self {
        Self {
            source: source.to_string(),
            default_status: if auto_approve {
                EventStatus::Approved
            } else {
                EventStatus::Pending
            },
            actor: SCRAPER_ACTOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    ExternalId,
    NaturalKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted { id: String },
    Updated { id: String, matched_by: MatchKind },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ItemFailure {
    pub name: String,
    pub external_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BatchReport {
    pub inserted: usize,
    pub updated: usize,
    pub failures: Vec<ItemFailure>,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.inserted + self.updated + self.failures.len()
    }
}

/// Copies the fields a re-scrape may legitimately change onto the stored row.
/// Identity fields, status and the creation stamp stay as stored.
fn apply_update(existing: &mut StoredEvent, incoming: &Event, policy: &SourcePolicy, now: DateTime<Utc>) {
    let target = &mut existing.event;
    target.description = incoming.description.clone();
    target.end_date = incoming.end_date;
    target.location_name = incoming.location_name.clone();
    target.location_id = incoming.location_id.clone();
    target.url = incoming.url.clone();
    target.image = incoming.image.clone();
    target.price = incoming.price.clone();
    target.category = unique_ordered(incoming.category.iter().cloned());
    target.tags = unique_ordered(incoming.tags.iter().cloned());
    target.event_type = incoming.event_type.clone();
    target.cle_credits = incoming.cle_credits;
    target.metadata = incoming.metadata.clone();
    existing.updated_at = now;
    existing.updated_by = policy.actor.clone();
}

fn new_record(incoming: &Event, policy: &SourcePolicy, now: DateTime<Utc>) -> StoredEvent {
    let mut event = incoming.clone();
    event.category = unique_ordered(event.category);
    event.tags = unique_ordered(event.tags);
    StoredEvent {
        id: Uuid::new_v4().to_string(),
        event,
        status: policy.default_status,
        submitted_by: policy.actor.clone(),
        created_at: now,
        updated_at: now,
        updated_by: policy.actor.clone(),
        notes: Some(format!(
            "Auto-imported from {} on {}",
            policy.source,
            now.to_rfc3339_opts(SecondsFormat::Secs, true)
        )),
    }
}

pub fn upsert_event<S: EventStore + ?Sized>(
    store: &mut S,
    incoming: &Event,
    policy: &SourcePolicy,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome, ReconcileError> {
    if incoming.name.trim().is_empty() {
        return Err(ReconcileError::EmptyName);
    }

    let existing = match store.find_by_external_id(&incoming.external_id)? {
        Some(row) => Some((row, MatchKind::ExternalId)),
        None => store
            .find_by_natural_key(&incoming.name, &incoming.start_date, &incoming.community_id)?
            .map(|row| (row, MatchKind::NaturalKey)),
    };

    match existing {
        Some((mut row, matched_by)) => {
            apply_update(&mut row, incoming, policy, now);
            store.update(&row)?;
            debug!(event = %incoming.name, id = %row.id, ?matched_by, "updated event");
            Ok(UpsertOutcome::Updated {
                id: row.id,
                matched_by,
            })
        }
        None => {
            let record = new_record(incoming, policy, now);
            store.insert(&record)?;
            debug!(event = %incoming.name, id = %record.id, status = %record.status, "inserted event");
            Ok(UpsertOutcome::Inserted { id: record.id })
        }
    }
}

/// Applies a batch in order. A failing item is recorded and the rest still run.
pub fn reconcile_batch<S: EventStore + ?Sized>(
    store: &mut S,
    events: &[Event],
    policy: &SourcePolicy,
    now: DateTime<Utc>,
) -> BatchReport {
    let mut report = BatchReport::default();
    for event in events {
        match upsert_event(store, event, policy, now) {
            Ok(UpsertOutcome::Inserted { .. }) => report.inserted += 1,
            Ok(UpsertOutcome::Updated { .. }) => report.updated += 1,
            Err(err) => {
                error!(source = %policy.source, event = %event.name, error = %err, "failed to persist event");
                report.failures.push(ItemFailure {
                    name: event.name.clone(),
                    external_id: event.external_id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }
    info!(
        source = %policy.source,
        inserted = report.inserted,
        updated = report.updated,
        failed = report.failures.len(),
        "reconciled batch"
    );
    report
}
