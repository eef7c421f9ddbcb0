//! Test doubles shared by the unit tests in this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::{
    entry::{Entry, EntryId},
    error::{Result, SchedulerError},
    observer::{format_fields, Field, Observer},
    store::{EntryRecord, EntryStore, SqliteStore},
};

/// Records every observer call for later assertions.
#[derive(Default)]
pub struct RecordingObserver {
    infos: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    added: Mutex<Vec<EntryId>>,
    removed: Mutex<Vec<EntryId>>,
    updated: Mutex<Vec<EntryId>>,
}

impl RecordingObserver {
    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn added(&self) -> Vec<EntryId> {
        self.added.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<EntryId> {
        self.removed.lock().unwrap().clone()
    }

    pub fn updated(&self) -> Vec<EntryId> {
        self.updated.lock().unwrap().clone()
    }
}

impl Observer for RecordingObserver {
    fn info(&self, msg: &str, fields: &[Field<'_>]) {
        let line = format!("{msg} {}", format_fields(fields));
        self.infos.lock().unwrap().push(line);
    }

    fn warn(&self, msg: &str, fields: &[Field<'_>]) {
        let line = format!("{msg} {}", format_fields(fields));
        self.warnings.lock().unwrap().push(line);
    }

    fn error(&self, err: &dyn std::error::Error, msg: &str, fields: &[Field<'_>]) {
        let line = format!("{msg}: {err} {}", format_fields(fields));
        self.errors.lock().unwrap().push(line);
    }

    fn entry_added(&self, entry: &Entry) {
        self.added.lock().unwrap().push(entry.id);
    }

    fn entry_removed(&self, entry: &Entry) {
        self.removed.lock().unwrap().push(entry.id);
    }

    fn entry_updated(&self, entry: &Entry) {
        self.updated.lock().unwrap().push(entry.id);
    }
}

/// In-memory SQLite store whose reads can be made to fail on demand.
/// Writes always go through.
pub struct FlakyStore {
    inner: SqliteStore,
    reads_fail: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            reads_fail: AtomicBool::new(false),
        }
    }

    pub fn fail_reads(&self) {
        self.reads_fail.store(true, Ordering::SeqCst);
    }

    /// Stored records, bypassing the failure switch.
    pub fn stored(&self) -> Vec<EntryRecord> {
        self.inner.load_all().unwrap()
    }

    fn check(&self) -> Result<()> {
        if self.reads_fail.load(Ordering::SeqCst) {
            return Err(SchedulerError::InvalidRecord("store unavailable".to_string()));
        }
        Ok(())
    }
}

impl EntryStore for FlakyStore {
    fn load_all(&self) -> Result<Vec<EntryRecord>> {
        self.check()?;
        self.inner.load_all()
    }

    fn save(&self, record: &EntryRecord) -> Result<()> {
        self.inner.save(record)
    }

    fn delete(&self, id: EntryId) -> Result<()> {
        self.inner.delete(id)
    }

    fn max_id(&self) -> Result<Option<EntryId>> {
        self.check()?;
        self.inner.max_id()
    }
}
