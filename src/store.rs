//! The persistence boundary. Reconciliation and cleanup are written against
//! `EventStore` once; `db::Store` and `file_store::JsonFileStore` implement it.

use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, StoreKind};
use crate::db::Store;
use crate::error::StoreError;
use crate::file_store::JsonFileStore;
use crate::models::{EventStatus, StoredEvent};
use crate::utils;

/// Status plus timestamp predicate used by the bulk sweeps. Timestamps are strict
/// upper bounds; empty `statuses` matches every status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub statuses: Vec<EventStatus>,
    pub ended_before: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn with_statuses(statuses: &[EventStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Self::default()
        }
    }

    pub fn ended_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.ended_before = Some(cutoff);
        self
    }

    pub fn updated_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.updated_before = Some(cutoff);
        self
    }

    pub fn matches(&self, record: &StoredEvent) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&record.status) {
            return false;
        }
        if let Some(cutoff) = self.ended_before {
            if record.event.end_date.with_timezone(&Utc) >= cutoff {
                return false;
            }
        }
        if let Some(cutoff) = self.updated_before {
            if record.updated_at >= cutoff {
                return false;
            }
        }
        true
    }
}

/// Audit stamp written alongside a bulk status transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusAudit {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub note: String,
}

pub trait EventStore {
    fn find_by_external_id(&self, external_id: &str) -> Result<Option<StoredEvent>, StoreError>;

    /// Exact `(name, start, community)` lookup; `start` compares as an instant.
    fn find_by_natural_key(
        &self,
        name: &str,
        start: &DateTime<FixedOffset>,
        community_id: &str,
    ) -> Result<Option<StoredEvent>, StoreError>;

    fn insert(&mut self, record: &StoredEvent) -> Result<(), StoreError>;

    /// Rewrites every column of an existing row except its id, creation stamp and submitter.
    fn update(&mut self, record: &StoredEvent) -> Result<(), StoreError>;

    fn delete_matching(&mut self, filter: &EventFilter) -> Result<usize, StoreError>;

    fn count_matching(&self, filter: &EventFilter) -> Result<usize, StoreError>;

    fn transition_matching(
        &mut self,
        filter: &EventFilter,
        to: EventStatus,
        audit: &StatusAudit,
    ) -> Result<usize, StoreError>;

    fn list(&self) -> Result<Vec<StoredEvent>, StoreError>;
}

/// Opens the backend selected in the configuration.
pub fn open_store(config: &AppConfig) -> Result<Box<dyn EventStore + Send>, StoreError> {
    match config.store {
        StoreKind::Sqlite => {
            let path = config
                .database_path
                .clone()
                .unwrap_or_else(utils::database_path);
            Ok(Box::new(Store::open(&path)?))
        }
        StoreKind::Json => {
            let path: PathBuf = config
                .json_path
                .clone()
                .unwrap_or_else(utils::json_store_path);
            Ok(Box::new(JsonFileStore::open(&path)?))
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use crate::models::{Event, EventStatus, StoredEvent, LOCATION_TBD};

    pub fn event(external_id: &str, name: &str, start: &str) -> Event {
        let start = DateTime::parse_from_rfc3339(start).expect("start");
        Event {
            external_id: external_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            start_date: start,
            end_date: start,
            location_name: LOCATION_TBD.to_string(),
            location_id: None,
            community_id: "com_src".to_string(),
            url: None,
            image: None,
            price: None,
            category: Vec::new(),
            tags: Vec::new(),
            event_type: "Event".to_string(),
            cle_credits: None,
            metadata: json!({}),
        }
    }

    pub fn stored(id: &str, event: Event, status: EventStatus, updated_at: DateTime<Utc>) -> StoredEvent {
        StoredEvent {
            id: id.to_string(),
            event,
            status,
            submitted_by: "system@scraper".to_string(),
            created_at: updated_at,
            updated_at,
            updated_by: "system@scraper".to_string(),
            notes: None,
        }
    }
}
