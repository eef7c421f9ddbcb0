use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    db::init_db,
    entry::EntryId,
    error::{Result, SchedulerError},
    registry::Record,
};

/// Externalized form of an entry: what the store actually holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: EntryId,
    pub schedule_type: String,
    pub schedule: Record,
    pub job_type: String,
    pub job: Record,
    pub next: Option<DateTime<Utc>>,
    pub prev: Option<DateTime<Utc>>,
}

/// Durable key/value storage for entry records, keyed by id.
pub trait EntryStore: Send + Sync {
    /// Every stored record, ordered by id.
    fn load_all(&self) -> Result<Vec<EntryRecord>>;

    /// Insert or replace the record with the same id.
    fn save(&self, record: &EntryRecord) -> Result<()>;

    /// Remove a record. `EntryNotFound` if nothing was stored under `id`.
    fn delete(&self, id: EntryId) -> Result<()>;

    fn max_id(&self) -> Result<Option<EntryId>>;

    /// First id not yet used by any stored record.
    fn next_id(&self) -> Result<EntryId> {
        Ok(self.max_id()?.map_or(1, |max| max + 1))
    }
}

/// [`EntryStore`] backed by a single SQLite connection.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }
}

type RawRow = (
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
);

impl EntryStore for SqliteStore {
    fn load_all(&self) -> Result<Vec<EntryRecord>> {
        let rows: Vec<RawRow> = {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare(
                "SELECT id, schedule_type, schedule, job_type, job, next_run, prev_run
                 FROM schedule_entries ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| -> rusqlite::Result<RawRow> {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?;
            let rows = rows.collect::<rusqlite::Result<Vec<RawRow>>>()?;
            rows
        };

        rows.into_iter().map(row_to_record).collect()
    }

    #[instrument(skip(self, record), fields(entry_id = record.id))]
    fn save(&self, record: &EntryRecord) -> Result<()> {
        let schedule = serde_json::to_string(&record.schedule)?;
        let job = serde_json::to_string(&record.job)?;
        let now = format_time(Utc::now());

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO schedule_entries
             (id, schedule_type, schedule, job_type, job, next_run, prev_run, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                to_sql_id(record.id)?,
                record.schedule_type,
                schedule,
                record.job_type,
                job,
                record.next.map(format_time),
                record.prev.map(format_time),
                now,
            ],
        )?;
        debug!("entry saved");
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete(&self, id: EntryId) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM schedule_entries WHERE id = ?1",
            [to_sql_id(id)?],
        )?;
        if n == 0 {
            return Err(SchedulerError::EntryNotFound { id });
        }
        debug!("entry deleted");
        Ok(())
    }

    fn max_id(&self) -> Result<Option<EntryId>> {
        let db = self.db.lock().unwrap();
        let max: Option<i64> = db
            .query_row("SELECT MAX(id) FROM schedule_entries", [], |row| row.get(0))?;
        Ok(max.map(|id| id as EntryId))
    }
}

fn row_to_record(row: RawRow) -> Result<EntryRecord> {
    let (id, schedule_type, schedule, job_type, job, next, prev) = row;
    Ok(EntryRecord {
        id: id as EntryId,
        schedule_type,
        schedule: serde_json::from_str(&schedule)?,
        job_type,
        job: serde_json::from_str(&job)?,
        next: next.as_deref().map(parse_time).transpose()?,
        prev: prev.as_deref().map(parse_time).transpose()?,
    })
}

fn to_sql_id(id: EntryId) -> Result<i64> {
    i64::try_from(id).map_err(|_| SchedulerError::InvalidRecord(format!("id {id} out of range")))
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SchedulerError::InvalidRecord(format!("bad timestamp '{s}': {e}")))
}
