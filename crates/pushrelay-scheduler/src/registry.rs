//! Type-tag registry for persistable schedules and jobs.
//!
//! The store only ever sees `(tag, record)` pairs. A [`Registry`] maps each
//! tag back to the concrete variant's [`Loadable::load`], so heterogeneous
//! entries can be reloaded without the storage layer knowing every type.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    entry::Entry,
    error::{Result, SchedulerError},
    job::Job,
    push::PushToSession,
    schedule::{Every, OneTime, Schedule},
    store::EntryRecord,
};

/// Generic key/value document a variant externalizes its state into.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Instance side of the persistence contract.
pub trait Saveable {
    /// Stable discriminator for the concrete variant.
    fn type_tag(&self) -> &'static str;
    fn save(&self) -> Result<Record>;
}

/// Type side of the persistence contract: rebuild a value from its record.
pub trait Loadable: Sized {
    const TYPE_TAG: &'static str;
    fn load(record: &Record) -> Result<Self>;
}

type ScheduleFactory = fn(&Record) -> Result<Arc<dyn Schedule>>;
type JobFactory = fn(&Record) -> Result<Arc<dyn Job>>;

fn load_schedule<T: Schedule + Loadable + 'static>(record: &Record) -> Result<Arc<dyn Schedule>> {
    Ok(Arc::new(T::load(record)?))
}

fn load_job<T: Job + Loadable + 'static>(record: &Record) -> Result<Arc<dyn Job>> {
    Ok(Arc::new(T::load(record)?))
}

pub struct Registry {
    schedules: HashMap<&'static str, ScheduleFactory>,
    jobs: HashMap<&'static str, JobFactory>,
}

impl Registry {
    /// An empty registry; nothing can be decoded until variants are registered.
    pub fn new() -> Self {
        Self {
            schedules: HashMap::new(),
            jobs: HashMap::new(),
        }
    }

    /// Registry preloaded with every built-in schedule and job.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .schedules
            .insert(OneTime::TYPE_TAG, load_schedule::<OneTime>);
        registry
            .schedules
            .insert(Every::TYPE_TAG, load_schedule::<Every>);
        registry
            .jobs
            .insert(PushToSession::TYPE_TAG, load_job::<PushToSession>);
        registry
    }

    pub fn register_schedule<T: Schedule + Loadable + 'static>(&mut self) -> Result<()> {
        if self.schedules.contains_key(T::TYPE_TAG) {
            return Err(SchedulerError::DuplicateType {
                kind: "schedule",
                tag: T::TYPE_TAG.to_string(),
            });
        }
        self.schedules.insert(T::TYPE_TAG, load_schedule::<T>);
        Ok(())
    }

    pub fn register_job<T: Job + Loadable + 'static>(&mut self) -> Result<()> {
        if self.jobs.contains_key(T::TYPE_TAG) {
            return Err(SchedulerError::DuplicateType {
                kind: "job",
                tag: T::TYPE_TAG.to_string(),
            });
        }
        self.jobs.insert(T::TYPE_TAG, load_job::<T>);
        Ok(())
    }

    pub fn schedule(&self, tag: &str, record: &Record) -> Result<Arc<dyn Schedule>> {
        let factory = self
            .schedules
            .get(tag)
            .ok_or_else(|| SchedulerError::UnknownType {
                kind: "schedule",
                tag: tag.to_string(),
            })?;
        factory(record)
    }

    pub fn job(&self, tag: &str, record: &Record) -> Result<Arc<dyn Job>> {
        let factory = self.jobs.get(tag).ok_or_else(|| SchedulerError::UnknownType {
            kind: "job",
            tag: tag.to_string(),
        })?;
        factory(record)
    }

    /// Rebuild a live entry from its persisted record.
    pub fn decode(&self, record: &EntryRecord) -> Result<Entry> {
        let schedule = self.schedule(&record.schedule_type, &record.schedule)?;
        let job = self.job(&record.job_type, &record.job)?;
        let mut entry = Entry::new(record.id, job, schedule);
        entry.next = record.next;
        entry.prev = record.prev;
        Ok(entry)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Fetch a required string field, naming the key in the error.
pub fn require_str<'a>(record: &'a Record, key: &str) -> Result<&'a str> {
    record
        .get(key)
        .ok_or_else(|| SchedulerError::InvalidRecord(format!("missing '{key}'")))?
        .as_str()
        .ok_or_else(|| SchedulerError::InvalidRecord(format!("'{key}' is not a string")))
}

/// Fetch a required unsigned integer field.
pub fn require_u64(record: &Record, key: &str) -> Result<u64> {
    record
        .get(key)
        .ok_or_else(|| SchedulerError::InvalidRecord(format!("missing '{key}'")))?
        .as_u64()
        .ok_or_else(|| SchedulerError::InvalidRecord(format!("'{key}' is not an unsigned integer")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn unknown_schedule_tag_is_rejected() {
        let registry = Registry::with_defaults();
        let err = registry
            .schedule("cron", &record(json!({"expr": "* * * * *"})))
            .err()
            .unwrap();
        assert!(matches!(err, SchedulerError::UnknownType { kind: "schedule", .. }));
        assert_eq!(err.to_string(), "unknown schedule type: cron");
    }

    #[test]
    fn unknown_job_tag_is_rejected() {
        let registry = Registry::new();
        let err = registry
            .job(PushToSession::TYPE_TAG, &record(json!({})))
            .err()
            .unwrap();
        assert!(matches!(err, SchedulerError::UnknownType { kind: "job", .. }));
    }

    #[test]
    fn duplicate_registration_fails_fast() {
        let mut registry = Registry::with_defaults();
        let err = registry.register_schedule::<OneTime>().unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateType { kind: "schedule", .. }));
        assert!(registry.register_job::<PushToSession>().is_err());

        let mut empty = Registry::new();
        assert!(empty.register_schedule::<OneTime>().is_ok());
    }

    #[test]
    fn decode_restores_entry_bookkeeping() {
        let registry = Registry::with_defaults();
        let next = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let rec = EntryRecord {
            id: 7,
            schedule_type: OneTime::TYPE_TAG.to_string(),
            schedule: record(json!({"time": "zero"})),
            job_type: PushToSession::TYPE_TAG.to_string(),
            job: record(json!({"url": "http://localhost/hook", "data": "{}"})),
            next: Some(next),
            prev: None,
        };

        let entry = registry.decode(&rec).unwrap();
        assert_eq!(entry.id, 7);
        assert_eq!(entry.next, Some(next));
        assert_eq!(entry.prev, None);
        assert_eq!(entry.schedule_type(), Some(OneTime::TYPE_TAG));
        assert_eq!(entry.job_type(), Some(PushToSession::TYPE_TAG));
    }

    #[test]
    fn required_fields_report_the_key() {
        let rec = record(json!({"url": 5}));
        let missing = require_str(&rec, "data").unwrap_err().to_string();
        assert!(missing.contains("missing 'data'"));
        let mistyped = require_str(&rec, "url").unwrap_err().to_string();
        assert!(mistyped.contains("'url' is not a string"));
        assert_eq!(require_u64(&record(json!({"n": 3})), "n").unwrap(), 3);
    }
}
