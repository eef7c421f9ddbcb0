use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    entry::{Entry, EntryId, EntryList, MemoryEntryList},
    error::{Result, SchedulerError},
    job::{FuncJob, Job},
    observer::{Observer, TracingObserver},
    schedule::Schedule,
};

/// Sleep used when nothing is scheduled; effectively "until woken".
const FAR_FUTURE: Duration = Duration::from_secs(240_000 * 3600);

const CHANNEL_CAPACITY: usize = 32;

struct AddRequest {
    id: EntryId,
    job: Arc<dyn Job>,
    schedule: Arc<dyn Schedule>,
    ack: oneshot::Sender<()>,
}

struct RemoveRequest {
    id: EntryId,
    ack: oneshot::Sender<()>,
}

type SnapshotRequest = oneshot::Sender<Vec<Entry>>;

#[derive(Clone)]
struct Channels {
    add: mpsc::Sender<AddRequest>,
    remove: mpsc::Sender<RemoveRequest>,
    snapshot: mpsc::Sender<SnapshotRequest>,
}

struct Running {
    channels: Channels,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

enum State {
    Idle {
        entries: Box<dyn EntryList>,
        observer: Arc<dyn Observer>,
    },
    Running(Running),
    Stopped,
}

/// In-process job scheduler.
///
/// Configure while idle, then call [`Scheduler::run`]. From then on a single
/// loop task owns every entry; `add_job`, `remove` and `entries` talk to it
/// over channels and wait until the loop has applied the request.
pub struct Scheduler {
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Idle scheduler with an in-memory entry list that logs via `tracing`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle {
                entries: Box::new(MemoryEntryList::new()),
                observer: Arc::new(TracingObserver),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn Observer>) -> Result<()> {
        match &mut *self.state.lock().unwrap() {
            State::Idle { observer: slot, .. } => {
                *slot = observer;
                Ok(())
            }
            State::Running(_) => Err(SchedulerError::Running),
            State::Stopped => Err(SchedulerError::Stopped),
        }
    }

    /// Replace the entry list. Ids continue after the highest id it holds.
    pub fn set_entries(&self, list: Box<dyn EntryList>) -> Result<()> {
        match &mut *self.state.lock().unwrap() {
            State::Idle { entries, .. } => {
                if let Some(max) = list.max_id() {
                    self.next_id.fetch_max(max + 1, Ordering::SeqCst);
                }
                *entries = list;
                Ok(())
            }
            State::Running(_) => Err(SchedulerError::Running),
            State::Stopped => Err(SchedulerError::Stopped),
        }
    }

    /// Id the next added entry will receive.
    pub fn peek_next_id(&self) -> EntryId {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Bind `job` to `schedule` and return the new entry's id.
    ///
    /// While running, an entry whose schedule yields no first fire time is
    /// dropped by the loop; the id is still consumed.
    pub async fn add_job(
        &self,
        job: impl Job + 'static,
        schedule: impl Schedule + 'static,
    ) -> EntryId {
        self.add_shared(Arc::new(job), Arc::new(schedule)).await
    }

    /// Schedule a plain closure. Closure jobs are never persisted.
    pub async fn add_func<F>(&self, f: F, schedule: impl Schedule + 'static) -> EntryId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.add_job(FuncJob::new(f), schedule).await
    }

    async fn add_shared(&self, job: Arc<dyn Job>, schedule: Arc<dyn Schedule>) -> EntryId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let channels = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                State::Idle { entries, .. } => {
                    let entry = entries.new_entry(id, job, schedule);
                    entries.add(&entry);
                    return id;
                }
                State::Running(running) => running.channels.clone(),
                State::Stopped => {
                    warn!(entry_id = id, "scheduler stopped, job not added");
                    return id;
                }
            }
        };

        let (ack, accepted) = oneshot::channel();
        let request = AddRequest {
            id,
            job,
            schedule,
            ack,
        };
        if channels.add.send(request).await.is_err() || accepted.await.is_err() {
            warn!(entry_id = id, "scheduler loop gone, job not added");
        }
        id
    }

    /// Remove an entry. Unknown ids are reported to the observer and ignored.
    pub async fn remove(&self, id: EntryId) {
        let channels = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                State::Idle { entries, observer } => {
                    match entries.all().into_iter().find(|e| e.id == id) {
                        Some(entry) => entries.remove(&entry),
                        None => observer.info("remove: no such entry", &[("id", &id)]),
                    }
                    return;
                }
                State::Running(running) => running.channels.clone(),
                State::Stopped => return,
            }
        };

        let (ack, done) = oneshot::channel();
        if channels.remove.send(RemoveRequest { id, ack }).await.is_err() || done.await.is_err() {
            warn!(entry_id = id, "scheduler loop gone, entry not removed");
        }
    }

    /// Point-in-time copy of every entry. Empty once stopped.
    ///
    /// The copies share their schedule and job with the live entries, so treat
    /// them as read-only: calling `schedule.next()` on one advances the
    /// scheduler's own schedule.
    pub async fn entries(&self) -> Vec<Entry> {
        let channels = {
            let state = self.state.lock().unwrap();
            match &*state {
                State::Idle { entries, .. } => return entries.all(),
                State::Running(running) => running.channels.clone(),
                State::Stopped => return Vec::new(),
            }
        };

        let (reply, snapshot) = oneshot::channel();
        if channels.snapshot.send(reply).await.is_err() {
            return Vec::new();
        }
        snapshot.await.unwrap_or_default()
    }

    /// Start the loop on the current tokio runtime. Calling it again, or after
    /// `stop`, does nothing.
    ///
    /// # Panics
    ///
    /// Panics outside a tokio runtime, or when the entry list cannot produce
    /// its entries (see [`crate::persist::DurableEntryList`]).
    pub fn run(&self) {
        let (list, observer) = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, State::Stopped) {
                State::Idle { entries, observer } => (entries, observer),
                other => {
                    *state = other;
                    return;
                }
            }
        };

        // Loaded without the state lock: a failing list panics here and leaves
        // the scheduler Stopped, not poisoned.
        let entries = list.all();

        let (add_tx, add_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (remove_tx, remove_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();

        let run_loop = RunLoop {
            entries,
            list,
            observer,
            add_rx,
            remove_rx,
            snapshot_rx,
            stop_rx,
        };
        let task = tokio::spawn(run_loop.run());

        *self.state.lock().unwrap() = State::Running(Running {
            channels: Channels {
                add: add_tx,
                remove: remove_tx,
                snapshot: snapshot_tx,
            },
            stop: stop_tx,
            task,
        });
    }

    /// Stop the loop and wait for it to exit. Jobs already dispatched keep
    /// running. The scheduler cannot be restarted.
    pub async fn stop(&self) {
        let previous = {
            let mut state = self.state.lock().unwrap();
            std::mem::replace(&mut *state, State::Stopped)
        };
        if let State::Running(running) = previous {
            let _ = running.stop.send(());
            if let Err(e) = running.task.await {
                warn!(error = %e, "scheduler loop ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock().unwrap(), State::Running(_))
    }
}

/// Owner of the live entries once the scheduler runs.
struct RunLoop {
    entries: Vec<Entry>,
    list: Box<dyn EntryList>,
    observer: Arc<dyn Observer>,
    add_rx: mpsc::Receiver<AddRequest>,
    remove_rx: mpsc::Receiver<RemoveRequest>,
    snapshot_rx: mpsc::Receiver<SnapshotRequest>,
    stop_rx: oneshot::Receiver<()>,
}

impl RunLoop {
    async fn run(mut self) {
        info!(entries = self.entries.len(), "scheduler started");
        self.prime(Utc::now());

        loop {
            let sleep = tokio::time::sleep(self.wait(Utc::now()));
            tokio::pin!(sleep);

            // Snapshots are answered without rearming the timer.
            loop {
                tokio::select! {
                    _ = &mut sleep => {
                        self.fire_due(Utc::now());
                        break;
                    }
                    Some(request) = self.add_rx.recv() => {
                        self.add(request);
                        break;
                    }
                    Some(request) = self.remove_rx.recv() => {
                        self.remove(request);
                        break;
                    }
                    Some(reply) = self.snapshot_rx.recv() => {
                        let _ = reply.send(self.entries.clone());
                    }
                    _ = &mut self.stop_rx => {
                        info!("scheduler stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Give every entry without a fire time its first one; drop the exhausted.
    fn prime(&mut self, now: DateTime<Utc>) {
        let mut i = 0;
        while i < self.entries.len() {
            let entry = &mut self.entries[i];
            if entry.next.is_none() {
                entry.next = entry.schedule.next(now);
                if entry.next.is_none() {
                    let removed = self.entries.swap_remove(i);
                    self.list.remove(&removed);
                    self.observer.entry_removed(&removed);
                    continue;
                }
                self.observer.entry_updated(entry);
            }
            i += 1;
        }
    }

    fn wait(&self, now: DateTime<Utc>) -> Duration {
        self.entries
            .iter()
            .filter_map(|e| e.next)
            .min()
            .map_or(FAR_FUTURE, |next| (next - now).to_std().unwrap_or(Duration::ZERO))
    }

    fn fire_due(&mut self, now: DateTime<Utc>) {
        let mut i = 0;
        while i < self.entries.len() {
            let entry = &mut self.entries[i];
            if !entry.next.is_some_and(|next| next <= now) {
                i += 1;
                continue;
            }

            let job = Arc::clone(&entry.job);
            tokio::spawn(async move { job.run().await });

            entry.prev = entry.next;
            entry.next = entry.schedule.next(now);
            self.observer.entry_updated(entry);

            let next = entry
                .next
                .map_or_else(|| "none".to_string(), |t| t.to_rfc3339());
            self.observer
                .info("job fired", &[("id", &entry.id), ("next", &next)]);

            if entry.next.is_none() {
                let removed = self.entries.swap_remove(i);
                self.list.remove(&removed);
                self.observer.entry_removed(&removed);
            } else {
                i += 1;
            }
        }
    }

    fn add(&mut self, request: AddRequest) {
        let AddRequest {
            id,
            job,
            schedule,
            ack,
        } = request;
        let mut entry = self.list.new_entry(id, job, schedule);
        entry.next = entry.schedule.next(Utc::now());
        if entry.next.is_some() {
            self.list.add(&entry);
            self.observer.entry_added(&entry);
            self.entries.push(entry);
        } else {
            self.observer
                .info("job not added, schedule has no fire time", &[("id", &id)]);
        }
        let _ = ack.send(());
    }

    fn remove(&mut self, request: RemoveRequest) {
        let RemoveRequest { id, ack } = request;
        match self.entries.iter().position(|e| e.id == id) {
            Some(pos) => {
                let removed = self.entries.swap_remove(pos);
                self.list.remove(&removed);
                self.observer.entry_removed(&removed);
            }
            None => self.observer.info("remove: no such entry", &[("id", &id)]),
        }
        let _ = ack.send(());
    }
}
