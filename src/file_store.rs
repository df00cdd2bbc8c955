use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, FixedOffset};

use crate::error::StoreError;
use crate::models::{EventStatus, StoredEvent};
use crate::store::{EventFilter, EventStore, StatusAudit};
use crate::utils;

/// Event store kept as one pretty-printed JSON array, rewritten after every mutation.
pub struct JsonFileStore {
    path: PathBuf,
    records: Vec<StoredEvent>,
}

impl JsonFileStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let records = read_records(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        write_records(&self.path, &self.records)
    }
}

fn read_records(path: &Path) -> Result<Vec<StoredEvent>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&contents)?)
}

fn write_records(path: &Path, records: &[StoredEvent]) -> Result<(), StoreError> {
    utils::ensure_parent(path);
    let contents = serde_json::to_string_pretty(records)?;
    fs::write(path, contents)?;
    Ok(())
}

impl EventStore for JsonFileStore {
    fn find_by_external_id(&self, external_id: &str) -> Result<Option<StoredEvent>, StoreError> {
        Ok(self
            .records
            .iter()
            .find(|r| r.event.external_id == external_id)
            .cloned())
    }

    fn find_by_natural_key(
        &self,
        name: &str,
        start: &DateTime<FixedOffset>,
        community_id: &str,
    ) -> Result<Option<StoredEvent>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| {
                r.event.name == name
                    && r.event.start_date == *start
                    && r.event.community_id == community_id
            })
            .min_by_key(|r| r.created_at)
            .cloned())
    }

    fn insert(&mut self, record: &StoredEvent) -> Result<(), StoreError> {
        if self
            .records
            .iter()
            .any(|r| r.event.external_id == record.event.external_id)
        {
            return Err(StoreError::DuplicateExternalId(
                record.event.external_id.clone(),
            ));
        }
        self.records.push(record.clone());
        self.persist()
    }

    fn update(&mut self, record: &StoredEvent) -> Result<(), StoreError> {
        let slot = self
            .records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
        let created_at = slot.created_at;
        let submitted_by = std::mem::take(&mut slot.submitted_by);
        *slot = StoredEvent {
            created_at,
            submitted_by,
            ..record.clone()
        };
        self.persist()
    }

    fn delete_matching(&mut self, filter: &EventFilter) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records.retain(|r| !filter.matches(r));
        let removed = before - self.records.len();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    fn count_matching(&self, filter: &EventFilter) -> Result<usize, StoreError> {
        Ok(self.records.iter().filter(|r| filter.matches(r)).count())
    }

    fn transition_matching(
        &mut self,
        filter: &EventFilter,
        to: EventStatus,
        audit: &StatusAudit,
    ) -> Result<usize, StoreError> {
        let mut changed = 0;
        for record in self.records.iter_mut().filter(|r| filter.matches(r)) {
            record.status = to;
            record.updated_at = audit.at;
            record.updated_by = audit.actor.clone();
            record.notes = Some(audit.note.clone());
            changed += 1;
        }
        if changed > 0 {
            self.persist()?;
        }
        Ok(changed)
    }

    fn list(&self) -> Result<Vec<StoredEvent>, StoreError> {
        let mut out = self.records.clone();
        out.sort_by(|a, b| {
            a.event
                .start_date
                .cmp(&b.event.start_date)
                .then_with(|| a.event.name.cmp(&b.event.name))
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::store::fixtures::{event, stored};

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.json");
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();

        {
            let mut store = JsonFileStore::open(&path).expect("open");
            store
                .insert(&stored("row", event("src_1", "Gala", "2025-03-01T18:00:00Z"), EventStatus::Approved, now))
                .expect("insert");
        }

        let store = JsonFileStore::open(&path).expect("reopen");
        let loaded = store.find_by_external_id("src_1").expect("lookup").expect("row");
        assert_eq!(loaded.id, "row");
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn update_keeps_creation_audit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonFileStore::open(&dir.path().join("events.json")).expect("open");
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let mut record = stored("row", event("src_1", "Gala", "2025-03-01T18:00:00Z"), EventStatus::Approved, now);
        store.insert(&record).expect("insert");

        record.created_at = now + Duration::days(1);
        record.submitted_by = "someone@else".to_string();
        record.event.description = "Updated".to_string();
        store.update(&record).expect("update");

        let loaded = store.find_by_external_id("src_1").expect("lookup").expect("row");
        assert_eq!(loaded.created_at, now);
        assert_eq!(loaded.submitted_by, "system@scraper");
        assert_eq!(loaded.event.description, "Updated");
    }

    #[test]
    fn natural_key_matches_instant_not_offset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonFileStore::open(&dir.path().join("events.json")).expect("open");
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        store
            .insert(&stored("row", event("src_1", "Gala", "2025-03-01T18:00:00Z"), EventStatus::Approved, now))
            .expect("insert");

        let start = DateTime::parse_from_rfc3339("2025-03-01T13:00:00-05:00").expect("start");
        assert!(store
            .find_by_natural_key("Gala", &start, "com_src")
            .expect("lookup")
            .is_some());
        assert!(store
            .find_by_natural_key("Gala", &start, "com_other")
            .expect("lookup")
            .is_none());
    }
}
