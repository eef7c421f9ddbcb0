use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};

use crate::{observer::Observer, registry::Saveable};

/// Lock wait after which [`DelayIfStillRunning`] reports a delay.
pub const DELAY_WARN_THRESHOLD: Duration = Duration::from_secs(10);

/// A unit of work run when its entry becomes due.
///
/// The scheduler spawns `run` and never looks at the outcome: failures are the
/// job's own business.
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self);

    /// Persistent form of this job, if it has one.
    fn persist(&self) -> Option<&dyn Saveable> {
        None
    }
}

#[async_trait]
impl<J: Job + ?Sized> Job for Arc<J> {
    async fn run(&self) {
        (**self).run().await
    }

    fn persist(&self) -> Option<&dyn Saveable> {
        (**self).persist()
    }
}

/// Adapts a plain closure into a transient [`Job`].
pub struct FuncJob<F>(F);

impl<F> FuncJob<F>
where
    F: Fn() + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Job for FuncJob<F>
where
    F: Fn() + Send + Sync,
{
    async fn run(&self) {
        (self.0)()
    }
}

/// Skips an invocation while a previous one is still in flight.
///
/// Guarantees at most one concurrent execution of the wrapped job.
pub struct SkipIfStillRunning<J> {
    inner: J,
    slot: Semaphore,
    observer: Arc<dyn Observer>,
}

impl<J: Job> SkipIfStillRunning<J> {
    pub fn new(inner: J, observer: Arc<dyn Observer>) -> Self {
        Self {
            inner,
            slot: Semaphore::new(1),
            observer,
        }
    }
}

#[async_trait]
impl<J: Job> Job for SkipIfStillRunning<J> {
    async fn run(&self) {
        match self.slot.try_acquire() {
            Ok(_permit) => self.inner.run().await,
            Err(_) => self
                .observer
                .info("job skipped, previous run still in progress", &[]),
        }
    }

    // Only the wrapped job is persisted; a reloaded entry runs unwrapped.
    fn persist(&self) -> Option<&dyn Saveable> {
        self.inner.persist()
    }
}

/// Serializes invocations and reports how long a run waited for its turn.
///
/// Queued invocations still run; the wrapper only observes contention.
pub struct DelayIfStillRunning<J> {
    inner: J,
    lock: Mutex<()>,
    threshold: Duration,
    observer: Arc<dyn Observer>,
}

impl<J: Job> DelayIfStillRunning<J> {
    pub fn new(inner: J, observer: Arc<dyn Observer>) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
            threshold: DELAY_WARN_THRESHOLD,
            observer,
        }
    }

    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }
}

#[async_trait]
impl<J: Job> Job for DelayIfStillRunning<J> {
    async fn run(&self) {
        let started = Instant::now();
        let _guard = self.lock.lock().await;
        let waited = started.elapsed();
        if waited > self.threshold {
            let duration = format!("{waited:?}");
            self.observer.warn(
                "job delayed, previous run still in progress",
                &[("duration", &duration)],
            );
        }
        self.inner.run().await
    }

    fn persist(&self) -> Option<&dyn Saveable> {
        self.inner.persist()
    }
}

/// Reentrancy combinators for any job.
pub trait JobExt: Job + Sized {
    fn skip_if_still_running(self, observer: Arc<dyn Observer>) -> SkipIfStillRunning<Self> {
        SkipIfStillRunning::new(self, observer)
    }

    fn delay_if_still_running(self, observer: Arc<dyn Observer>) -> DelayIfStillRunning<Self> {
        DelayIfStillRunning::new(self, observer)
    }
}

impl<J: Job> JobExt for J {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingObserver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Counts runs and stays in flight until released.
    struct HeldOpen {
        runs: Arc<AtomicUsize>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Job for HeldOpen {
        async fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
        }
    }

    async fn wait_for(runs: &AtomicUsize, n: usize) {
        for _ in 0..200 {
            if runs.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job never reached {n} runs");
    }

    #[tokio::test]
    async fn func_job_calls_closure() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let job = FuncJob::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        job.run().await;
        job.run().await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(job.persist().is_none());
    }

    #[tokio::test]
    async fn skip_runs_body_once_while_held_open() {
        let observer = Arc::new(RecordingObserver::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let job = Arc::new(
            HeldOpen {
                runs: Arc::clone(&runs),
                release: Arc::clone(&release),
            }
            .skip_if_still_running(observer.clone()),
        );

        let first = tokio::spawn({
            let job = Arc::clone(&job);
            async move { job.run().await }
        });
        wait_for(&runs, 1).await;

        // Second invocation must return without waiting for the first.
        tokio::time::timeout(Duration::from_millis(200), job.run())
            .await
            .expect("skipped invocation blocked");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(observer.infos().iter().any(|m| m.contains("skipped")));

        release.notify_one();
        first.await.unwrap();

        // The slot is free again once the first run finishes.
        let second = tokio::spawn({
            let job = Arc::clone(&job);
            async move { job.run().await }
        });
        wait_for(&runs, 2).await;
        release.notify_one();
        second.await.unwrap();
    }

    #[tokio::test]
    async fn delay_serializes_and_reports_long_waits() {
        let observer = Arc::new(RecordingObserver::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let job = Arc::new(
            HeldOpen {
                runs: Arc::clone(&runs),
                release: Arc::clone(&release),
            }
            .delay_if_still_running(observer.clone())
            .with_threshold(Duration::from_millis(20)),
        );

        let first = tokio::spawn({
            let job = Arc::clone(&job);
            async move { job.run().await }
        });
        wait_for(&runs, 1).await;
        let second = tokio::spawn({
            let job = Arc::clone(&job);
            async move { job.run().await }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        // Queued behind the lock, not skipped and not yet running.
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        release.notify_one();
        first.await.unwrap();
        wait_for(&runs, 2).await;
        release.notify_one();
        second.await.unwrap();

        let warnings = observer.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("delayed"));
        assert!(warnings[0].contains("duration"));
    }

    #[tokio::test]
    async fn delay_is_quiet_without_contention() {
        let observer = Arc::new(RecordingObserver::default());
        let job = FuncJob::new(|| {}).delay_if_still_running(observer.clone());
        job.run().await;
        assert!(observer.warnings().is_empty());
    }
}
