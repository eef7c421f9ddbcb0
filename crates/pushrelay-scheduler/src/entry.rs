use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    error::{Result, SchedulerError},
    job::Job,
    schedule::Schedule,
    store::EntryRecord,
};

/// Scheduler-assigned identifier; also the primary key in durable storage.
pub type EntryId = u64;

/// One schedule bound to one job, plus scheduling bookkeeping.
///
/// Cloning is cheap: schedule and job are shared, `next`/`prev` are copied.
#[derive(Clone)]
pub struct Entry {
    pub id: EntryId,
    pub schedule: Arc<dyn Schedule>,
    pub job: Arc<dyn Job>,
    /// Next fire time; `None` once the schedule is exhausted.
    pub next: Option<DateTime<Utc>>,
    /// Last fire time. Informational only.
    pub prev: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn new(id: EntryId, job: Arc<dyn Job>, schedule: Arc<dyn Schedule>) -> Self {
        Self {
            id,
            schedule,
            job,
            next: None,
            prev: None,
        }
    }

    pub fn schedule_type(&self) -> Option<&'static str> {
        self.schedule.persist().map(|s| s.type_tag())
    }

    pub fn job_type(&self) -> Option<&'static str> {
        self.job.persist().map(|j| j.type_tag())
    }

    /// Externalize the entry for the store.
    ///
    /// Fails with `NotPersistable` when either half has no persistent form.
    pub fn to_record(&self) -> Result<EntryRecord> {
        let not_persistable = || SchedulerError::NotPersistable { id: self.id };
        let schedule = self.schedule.persist().ok_or_else(not_persistable)?;
        let job = self.job.persist().ok_or_else(not_persistable)?;
        Ok(EntryRecord {
            id: self.id,
            schedule_type: schedule.type_tag().to_string(),
            schedule: schedule.save()?,
            job_type: job.type_tag().to_string(),
            job: job.save()?,
            next: self.next,
            prev: self.prev,
        })
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("schedule", &self.schedule_type().unwrap_or("transient"))
            .field("job", &self.job_type().unwrap_or("transient"))
            .field("next", &self.next)
            .field("prev", &self.prev)
            .finish()
    }
}

/// Ownership and persistence boundary for the scheduler's entries.
///
/// While the scheduler is idle it mutates the list directly; once running,
/// the list only hears about changes the loop has already applied.
pub trait EntryList: Send {
    /// Bind a job and schedule into an entry. Nothing is made visible or
    /// persisted until [`EntryList::add`].
    fn new_entry(&self, id: EntryId, job: Arc<dyn Job>, schedule: Arc<dyn Schedule>) -> Entry {
        Entry::new(id, job, schedule)
    }

    /// Point-in-time snapshot of every known entry.
    fn all(&self) -> Vec<Entry>;

    fn len(&self) -> usize {
        self.all().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the entry durable. Failures are reported, never returned.
    fn add(&mut self, entry: &Entry);

    /// Forget the entry. Failures are reported, never returned.
    fn remove(&mut self, entry: &Entry);

    /// Highest id this list has ever held; seeds the scheduler's id counter.
    fn max_id(&self) -> Option<EntryId> {
        self.all().iter().map(|e| e.id).max()
    }
}

/// Ephemeral list: entries live in process memory and vanish on restart.
#[derive(Default)]
pub struct MemoryEntryList {
    entries: Vec<Entry>,
}

impl MemoryEntryList {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntryList for MemoryEntryList {
    fn all(&self) -> Vec<Entry> {
        self.entries.clone()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn add(&mut self, entry: &Entry) {
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry.clone(),
            None => self.entries.push(entry.clone()),
        }
    }

    fn remove(&mut self, entry: &Entry) {
        self.entries.retain(|e| e.id != entry.id);
    }
}
