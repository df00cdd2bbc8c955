use std::path::Path;

use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Connection, OptionalExtension, Row};

use crate::error::StoreError;
use crate::models::{Event, EventStatus, StoredEvent};
use crate::store::{EventFilter, EventStore, StatusAudit};
use crate::utils;

const SELECT_COLUMNS: &str = "id, payload, status, submitted_by, created_at, updated_at, updated_by, notes";

/// SQLite-backed event store. Every write is a single autocommit statement, so a
/// crash mid-batch leaves already-processed events committed.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        utils::ensure_parent(path);
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events(
                id TEXT PRIMARY KEY,
                external_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                community_id TEXT NOT NULL,
                start_ms INTEGER NOT NULL,
                end_ms INTEGER NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                submitted_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                updated_ms INTEGER NOT NULL,
                updated_by TEXT NOT NULL,
                notes TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_events_natural_key
                ON events(name, start_ms, community_id);
            CREATE INDEX IF NOT EXISTS idx_events_status_end
                ON events(status, end_ms);",
        )?;
        Ok(())
    }

    fn query_one(&self, sql: &str, args: &[SqlValue]) -> Result<Option<StoredEvent>, StoreError> {
        let row = self
            .conn
            .query_row(sql, params_from_iter(args.iter()), RawRow::from_row)
            .optional()?;
        row.map(RawRow::into_stored).transpose()
    }
}

/// Column values as read, before the payload and status are decoded.
struct RawRow {
    id: String,
    payload: String,
    status: String,
    submitted_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    updated_by: String,
    notes: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            payload: row.get(1)?,
            status: row.get(2)?,
            submitted_by: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            updated_by: row.get(6)?,
            notes: row.get(7)?,
        })
    }

    fn into_stored(self) -> Result<StoredEvent, StoreError> {
        let event: Event = serde_json::from_str(&self.payload)?;
        Ok(StoredEvent {
            id: self.id,
            event,
            status: self.status.parse()?,
            submitted_by: self.submitted_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            updated_by: self.updated_by,
            notes: self.notes,
        })
    }
}

/// Builds ` WHERE ...` for a filter, appending bound values to `args`.
fn where_clause(filter: &EventFilter, args: &mut Vec<SqlValue>) -> String {
    let mut clauses = Vec::new();
    if !filter.statuses.is_empty() {
        let marks = vec!["?"; filter.statuses.len()].join(", ");
        clauses.push(format!("status IN ({marks})"));
        args.extend(
            filter
                .statuses
                .iter()
                .map(|s| SqlValue::Text(s.as_str().to_string())),
        );
    }
    if let Some(cutoff) = filter.ended_before {
        clauses.push("end_ms < ?".to_string());
        args.push(SqlValue::Integer(cutoff.timestamp_millis()));
    }
    if let Some(cutoff) = filter.updated_before {
        clauses.push("updated_ms < ?".to_string());
        args.push(SqlValue::Integer(cutoff.timestamp_millis()));
    }
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

impl EventStore for Store {
    fn find_by_external_id(&self, external_id: &str) -> Result<Option<StoredEvent>, StoreError> {
        self.query_one(
            &format!("SELECT {SELECT_COLUMNS} FROM events WHERE external_id = ?1"),
            &[SqlValue::Text(external_id.to_string())],
        )
    }

    fn find_by_natural_key(
        &self,
        name: &str,
        start: &DateTime<FixedOffset>,
        community_id: &str,
    ) -> Result<Option<StoredEvent>, StoreError> {
        self.query_one(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM events
                 WHERE name = ?1 AND start_ms = ?2 AND community_id = ?3
                 ORDER BY created_at LIMIT 1"
            ),
            &[
                SqlValue::Text(name.to_string()),
                SqlValue::Integer(start.timestamp_millis()),
                SqlValue::Text(community_id.to_string()),
            ],
        )
    }

    fn insert(&mut self, record: &StoredEvent) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&record.event)?;
        let event = &record.event;
        let result = self.conn.execute(
            "INSERT INTO events (id, external_id, name, community_id, start_ms, end_ms, status,
                                 payload, submitted_by, created_at, updated_at, updated_ms,
                                 updated_by, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                record.id,
                event.external_id,
                event.name,
                event.community_id,
                event.start_date.timestamp_millis(),
                event.end_date.timestamp_millis(),
                record.status.as_str(),
                payload,
                record.submitted_by,
                record.created_at,
                record.updated_at,
                record.updated_at.timestamp_millis(),
                record.updated_by,
                record.notes,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(StoreError::DuplicateExternalId(event.external_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn update(&mut self, record: &StoredEvent) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&record.event)?;
        let event = &record.event;
        let changed = self.conn.execute(
            "UPDATE events SET
                external_id = ?2, name = ?3, community_id = ?4, start_ms = ?5, end_ms = ?6,
                status = ?7, payload = ?8, updated_at = ?9, updated_ms = ?10,
                updated_by = ?11, notes = ?12
             WHERE id = ?1",
            params![
                record.id,
                event.external_id,
                event.name,
                event.community_id,
                event.start_date.timestamp_millis(),
                event.end_date.timestamp_millis(),
                record.status.as_str(),
                payload,
                record.updated_at,
                record.updated_at.timestamp_millis(),
                record.updated_by,
                record.notes,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(record.id.clone()));
        }
        Ok(())
    }

    fn delete_matching(&mut self, filter: &EventFilter) -> Result<usize, StoreError> {
        let mut args = Vec::new();
        let sql = format!("DELETE FROM events{}", where_clause(filter, &mut args));
        Ok(self.conn.execute(&sql, params_from_iter(args.iter()))?)
    }

    fn count_matching(&self, filter: &EventFilter) -> Result<usize, StoreError> {
        let mut args = Vec::new();
        let sql = format!("SELECT COUNT(*) FROM events{}", where_clause(filter, &mut args));
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn transition_matching(
        &mut self,
        filter: &EventFilter,
        to: EventStatus,
        audit: &StatusAudit,
    ) -> Result<usize, StoreError> {
        let mut args = vec![
            SqlValue::Text(to.as_str().to_string()),
            SqlValue::Text(audit.at.to_rfc3339()),
            SqlValue::Integer(audit.at.timestamp_millis()),
            SqlValue::Text(audit.actor.clone()),
            SqlValue::Text(audit.note.clone()),
        ];
        let sql = format!(
            "UPDATE events SET status = ?, updated_at = ?, updated_ms = ?, updated_by = ?, notes = ?{}",
            where_clause(filter, &mut args)
        );
        Ok(self.conn.execute(&sql, params_from_iter(args.iter()))?)
    }

    fn list(&self) -> Result<Vec<StoredEvent>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM events ORDER BY start_ms, name"
        ))?;
        let rows = stmt.query_map([], RawRow::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_stored()?);
        }
        Ok(out)
    }
}
