//! Store-backed entry list and the observer that writes updates through.

use std::sync::Arc;

use crate::{
    entry::{Entry, EntryId, EntryList},
    error::{Result, SchedulerError},
    observer::{Field, Observer},
    registry::Registry,
    store::EntryStore,
};

/// [`EntryList`] whose contents survive restarts.
///
/// Persistable entries live only in the store and are decoded through the
/// registry on every [`EntryList::all`]. Entries with a transient schedule or
/// job are reported and kept in memory for the life of the process.
pub struct DurableEntryList {
    store: Arc<dyn EntryStore>,
    registry: Registry,
    observer: Arc<dyn Observer>,
    transient: Vec<Entry>,
    max_seen: Option<EntryId>,
}

impl DurableEntryList {
    /// Validate every stored record against `registry` and wrap the store.
    ///
    /// Fails on the first record whose type tag is unknown or whose state does
    /// not decode, so a bad database is caught at startup rather than mid-run.
    /// The highest id in use is fixed here; ids handed out later never reuse it.
    pub fn open(
        store: Arc<dyn EntryStore>,
        registry: Registry,
        observer: Arc<dyn Observer>,
    ) -> Result<Self> {
        let records = store.load_all()?;
        for record in &records {
            registry.decode(record)?;
        }
        let first_free = store.next_id()?;
        let max_seen = records
            .iter()
            .map(|r| r.id)
            .max()
            .max(first_free.checked_sub(1).filter(|&id| id > 0));
        let count = records.len();
        observer.info("entries loaded", &[("count", &count)]);
        Ok(Self {
            store,
            registry,
            observer,
            transient: Vec::new(),
            max_seen,
        })
    }
}

impl EntryList for DurableEntryList {
    /// # Panics
    ///
    /// Panics if the store cannot be read or holds a record that no longer
    /// decodes. A scheduler over a broken store has nothing sane to run.
    fn all(&self) -> Vec<Entry> {
        let records = self
            .store
            .load_all()
            .unwrap_or_else(|e| panic!("failed to load schedule entries: {e}"));
        let mut entries: Vec<Entry> = records
            .iter()
            .map(|record| {
                self.registry
                    .decode(record)
                    .unwrap_or_else(|e| panic!("failed to decode entry {}: {e}", record.id))
            })
            .collect();
        entries.extend(self.transient.iter().cloned());
        entries
    }

    fn add(&mut self, entry: &Entry) {
        self.max_seen = self.max_seen.max(Some(entry.id));
        let record = match entry.to_record() {
            Ok(record) => record,
            Err(e @ SchedulerError::NotPersistable { .. }) => {
                self.observer
                    .error(&e, "entry kept in memory only", &[("id", &entry.id)]);
                match self.transient.iter_mut().find(|t| t.id == entry.id) {
                    Some(existing) => *existing = entry.clone(),
                    None => self.transient.push(entry.clone()),
                }
                return;
            }
            Err(e) => {
                self.observer
                    .error(&e, "failed to encode entry", &[("id", &entry.id)]);
                return;
            }
        };
        if let Err(e) = self.store.save(&record) {
            self.observer
                .error(&e, "failed to save entry", &[("id", &entry.id)]);
        }
    }

    fn remove(&mut self, entry: &Entry) {
        if let Some(pos) = self.transient.iter().position(|t| t.id == entry.id) {
            self.transient.swap_remove(pos);
            return;
        }
        if let Err(e) = self.store.delete(entry.id) {
            self.observer
                .error(&e, "failed to delete entry", &[("id", &entry.id)]);
        }
    }

    fn max_id(&self) -> Option<EntryId> {
        self.max_seen
    }
}

/// Observer decorator that writes every updated entry back to the store.
///
/// Runs on the scheduler loop, so each update costs one synchronous store
/// write before the next wake is armed. Exhausted entries are skipped; the
/// entry list deletes them right after.
pub struct StoreObserver {
    store: Arc<dyn EntryStore>,
    inner: Arc<dyn Observer>,
}

impl StoreObserver {
    pub fn new(store: Arc<dyn EntryStore>, inner: Arc<dyn Observer>) -> Self {
        Self { store, inner }
    }
}

impl Observer for StoreObserver {
    fn info(&self, msg: &str, fields: &[Field<'_>]) {
        self.inner.info(msg, fields)
    }

    fn warn(&self, msg: &str, fields: &[Field<'_>]) {
        self.inner.warn(msg, fields)
    }

    fn error(&self, err: &dyn std::error::Error, msg: &str, fields: &[Field<'_>]) {
        self.inner.error(err, msg, fields)
    }

    fn entry_added(&self, entry: &Entry) {
        self.inner.entry_added(entry)
    }

    fn entry_removed(&self, entry: &Entry) {
        self.inner.entry_removed(entry)
    }

    fn entry_updated(&self, entry: &Entry) {
        if entry.next.is_some() {
            match entry.to_record() {
                Ok(record) => {
                    if let Err(e) = self.store.save(&record) {
                        self.inner
                            .error(&e, "failed to persist entry update", &[("id", &entry.id)]);
                    }
                }
                Err(SchedulerError::NotPersistable { .. }) => {}
                Err(e) => self
                    .inner
                    .error(&e, "failed to encode entry update", &[("id", &entry.id)]),
            }
        }
        self.inner.entry_updated(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FuncJob;
    use crate::push::PushToSession;
    use crate::registry::Loadable;
    use crate::schedule::{OneTime, Schedule};
    use crate::store::{EntryRecord, SqliteStore};
    use crate::testing::{FlakyStore, RecordingObserver};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn store() -> Arc<dyn EntryStore> {
        Arc::new(SqliteStore::open_in_memory().unwrap())
    }

    fn push_entry(id: EntryId) -> Entry {
        let at = Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).unwrap();
        Entry::new(
            id,
            Arc::new(PushToSession::new("http://localhost/hook", b"{}".to_vec())),
            Arc::new(OneTime::new(at)),
        )
    }

    fn func_entry(id: EntryId) -> Entry {
        let at = Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).unwrap();
        Entry::new(id, Arc::new(FuncJob::new(|| {})), Arc::new(OneTime::new(at)))
    }

    #[test]
    fn open_loads_and_reports_count() {
        let store = store();
        store.save(&push_entry(1).to_record().unwrap()).unwrap();
        store.save(&push_entry(4).to_record().unwrap()).unwrap();
        let observer = Arc::new(RecordingObserver::default());

        let list =
            DurableEntryList::open(Arc::clone(&store), Registry::with_defaults(), observer.clone())
                .unwrap();
        let ids: Vec<EntryId> = list.all().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 4]);
        assert_eq!(list.max_id(), Some(4));
        assert!(observer.infos().iter().any(|m| m.contains("count=2")));
    }

    #[test]
    fn open_aborts_on_unknown_tag() {
        let store = store();
        store
            .save(&EntryRecord {
                id: 1,
                schedule_type: "cron".to_string(),
                schedule: json!({"expr": "0 * * * *"}).as_object().cloned().unwrap(),
                job_type: PushToSession::TYPE_TAG.to_string(),
                job: json!({"url": "http://x", "data": ""}).as_object().cloned().unwrap(),
                next: None,
                prev: None,
            })
            .unwrap();

        let err = DurableEntryList::open(
            store,
            Registry::with_defaults(),
            Arc::new(RecordingObserver::default()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, SchedulerError::UnknownType { kind: "schedule", .. }));
    }

    #[test]
    fn add_and_remove_write_through() {
        let store = store();
        let observer = Arc::new(RecordingObserver::default());
        let mut list =
            DurableEntryList::open(Arc::clone(&store), Registry::with_defaults(), observer.clone())
                .unwrap();

        list.add(&push_entry(3));
        assert_eq!(store.load_all().unwrap().len(), 1);
        assert_eq!(list.len(), 1);

        list.remove(&push_entry(3));
        assert!(store.load_all().unwrap().is_empty());
        assert!(observer.errors().is_empty());

        // Removing again is reported, not propagated.
        list.remove(&push_entry(3));
        assert_eq!(observer.errors().len(), 1);
    }

    #[test]
    fn transient_entries_stay_in_memory() {
        let store = store();
        let observer = Arc::new(RecordingObserver::default());
        let mut list =
            DurableEntryList::open(Arc::clone(&store), Registry::with_defaults(), observer.clone())
                .unwrap();

        list.add(&func_entry(8));
        assert!(store.load_all().unwrap().is_empty());
        assert_eq!(list.all().len(), 1);
        assert_eq!(list.max_id(), Some(8));
        assert!(observer.errors()[0].contains("not persistable"));

        list.remove(&func_entry(8));
        assert!(list.is_empty());
    }

    #[test]
    fn max_id_is_fixed_at_open_and_tracks_adds() {
        let store = Arc::new(FlakyStore::new());
        store.save(&push_entry(6).to_record().unwrap()).unwrap();
        let mut list = DurableEntryList::open(
            store.clone(),
            Registry::with_defaults(),
            Arc::new(RecordingObserver::default()),
        )
        .unwrap();

        store.fail_reads();
        assert_eq!(list.max_id(), Some(6));
        list.add(&push_entry(9));
        assert_eq!(list.max_id(), Some(9));
        list.remove(&push_entry(9));
        assert_eq!(list.max_id(), Some(9));
    }

    #[test]
    fn open_fails_when_store_is_unreadable() {
        let store = Arc::new(FlakyStore::new());
        store.fail_reads();
        let err = DurableEntryList::open(
            store,
            Registry::with_defaults(),
            Arc::new(RecordingObserver::default()),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("store unavailable"));
    }

    #[test]
    #[should_panic(expected = "failed to load schedule entries")]
    fn all_panics_when_store_is_unreadable() {
        let store = Arc::new(FlakyStore::new());
        store.save(&push_entry(1).to_record().unwrap()).unwrap();
        let list = DurableEntryList::open(
            store.clone(),
            Registry::with_defaults(),
            Arc::new(RecordingObserver::default()),
        )
        .unwrap();

        store.fail_reads();
        list.all();
    }

    #[test]
    fn store_observer_saves_updates_and_forwards() {
        let store = store();
        let inner = Arc::new(RecordingObserver::default());
        let observer = StoreObserver::new(Arc::clone(&store), inner.clone());

        let mut entry = push_entry(2);
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        entry.next = entry.schedule.next(now);
        observer.entry_updated(&entry);

        let saved = store.load_all().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].next, entry.next);
        assert_eq!(saved[0].schedule["time"], "zero");
        assert_eq!(inner.updated(), vec![2]);

        observer.entry_added(&entry);
        observer.entry_removed(&entry);
        assert_eq!(inner.added(), vec![2]);
        assert_eq!(inner.removed(), vec![2]);
    }

    #[test]
    fn store_observer_skips_exhausted_and_transient_entries() {
        let store = store();
        let inner = Arc::new(RecordingObserver::default());
        let observer = StoreObserver::new(Arc::clone(&store), inner.clone());

        observer.entry_updated(&push_entry(1));
        let mut transient = func_entry(2);
        transient.next = Some(Utc::now());
        observer.entry_updated(&transient);

        assert!(store.load_all().unwrap().is_empty());
        assert!(inner.errors().is_empty());
        assert_eq!(inner.updated(), vec![1, 2]);
    }
}
