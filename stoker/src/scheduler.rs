//! Bounded-concurrency job scheduler
//!
//! Runs caller-submitted work units under a configurable concurrency cap,
//! tracks their lifecycle and publishes every status transition to
//! subscribers. Jobs queue in `pending` without bound; admission is FIFO
//! when the cap is saturated.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use dashmap::DashMap;
use futures_util::{FutureExt, Stream, stream};
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::TaskTracker;
use crate::error::{Error, ErrorKind, panic_message};
use crate::id::Id;

pub use job::{Completion, Job, JobFilter, JobStatus};

pub mod job;

/// Configuration for a [`Scheduler`]
#[derive(Default, Debug, Clone)]
pub struct SchedulerOptions {
    max_concurrency: Option<usize>,
}

impl SchedulerOptions {
    /// Creates a new [`SchedulerOptions`] with an unbounded concurrency cap
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// Caps the number of concurrently running jobs
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }
}

struct JobEntry {
    tx: watch::Sender<Job>,
    token: CancellationToken,
}

struct Inner {
    jobs: DashMap<Id, JobEntry>,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    stopped: AtomicBool,
}

/// A bounded-parallel executor of submitted work units.
///
/// Cloning is cheap; all clones drive the same job table.
///
/// # Example
/// ```no_run
/// use stoker::{Completion, Scheduler, SchedulerOptions};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), stoker::Error> {
/// let scheduler = Scheduler::with_options(SchedulerOptions::new()
///     .with_max_concurrency(4));
///
/// let job_id = scheduler.submit(|_ctx| async move {
///     // do the work
///     Ok(Completion::Finished)
/// })?;
///
/// let job = scheduler.get(&job_id)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// A per-job handle passed into the work unit.
///
/// Carries the job's cancellation token and links the produced artifact to
/// the job record.
#[derive(Clone)]
pub struct JobContext {
    id: Id,
    token: CancellationToken,
    inner: std::sync::Weak<Inner>,
}

impl JobContext {
    /// Returns the job identifier
    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    /// Returns a clone of the job's cancellation token
    #[inline]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Returns whether cancellation has been requested
    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns a [`Future`] that gets fulfilled when cancellation is requested.
    ///
    /// # Cancellation safety
    ///
    /// This method is cancel safe.
    #[inline]
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Links an artifact to the job record.
    ///
    /// A no-op once the job is terminal.
    pub fn attach_artifact(&self, artifact_id: Id) {
        if let Some(inner) = self.inner.upgrade() {
            inner.update(&self.id, |job| job.artifact_id = Some(artifact_id));
        }
    }
}

impl Scheduler {
    /// Creates a new [`Scheduler`] with an unbounded concurrency cap
    pub fn new() -> Self {
        Self::with_options(SchedulerOptions::new())
    }

    /// Creates a new [`Scheduler`] with the given options
    pub fn with_options(options: SchedulerOptions) -> Self {
        let permits = options
            .max_concurrency
            .unwrap_or(Semaphore::MAX_PERMITS);
        Self {
            inner: Arc::new(Inner {
                jobs: DashMap::new(),
                semaphore: Arc::new(Semaphore::new(permits)),
                tracker: TaskTracker::new(),
                stopped: AtomicBool::new(false),
            })
        }
    }

    /// Submits a work unit and returns its job id immediately.
    ///
    /// The job starts in `pending` and is admitted once a concurrency slot
    /// frees up; submissions are never rejected for being over the cap. The
    /// work unit reports its own outcome: [`Completion::Finished`] maps to
    /// `completed`, [`Completion::Canceled`] to `canceled` and an `Err` to
    /// `failed` with the error message and trace captured on the record.
    /// A panic escaping the work unit also yields `failed`.
    pub fn submit<F, Fut>(&self, work: F) -> Result<Id, Error>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Completion, Error>> + Send + 'static,
    {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Conflict, "scheduler is stopped"));
        }

        let job = Job::new();
        let id = job.id;
        let token = CancellationToken::new();
        let (tx, _) = watch::channel(job);

        self.inner.jobs.insert(id, JobEntry { tx, token: token.clone() });

        let ctx = JobContext {
            id,
            token: token.clone(),
            inner: Arc::downgrade(&self.inner),
        };
        let inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            Inner::run(inner, id, token, work, ctx).await;
        });

        tracing::debug!(job = %id, "job submitted");
        Ok(id)
    }

    /// Returns the current snapshot of a job record
    pub fn get(&self, id: &Id) -> Result<Job, Error> {
        self.inner
            .jobs
            .get(id)
            .map(|entry| entry.tx.borrow().clone())
            .ok_or_else(|| Error::new(
                ErrorKind::NotFound,
                format!("job not found: {id}")))
    }

    /// Returns snapshots of all jobs matching the filter,
    /// in submission order
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let mut jobs = self.inner
            .jobs
            .iter()
            .map(|entry| entry.tx.borrow().clone())
            .filter(|job| filter.status.is_none_or(|status| job.status == status))
            .collect::<Vec<_>>();
        jobs.sort_by_key(|job| (job.submitted_at, job.id));
        jobs
    }

    /// Requests cancellation of a job and returns its current snapshot.
    ///
    /// A `pending` job transitions to `canceled` without ever running. A
    /// `running` job is signaled cooperatively: the transition completes
    /// when the work unit observes the token and returns. Terminal jobs are
    /// left untouched. Idempotent; never waits for the work unit.
    pub fn cancel(&self, id: &Id) -> Result<Job, Error> {
        let entry = self.inner
            .jobs
            .get(id)
            .ok_or_else(|| Error::new(
                ErrorKind::NotFound,
                format!("job not found: {id}")))?;

        entry.token.cancel();
        tracing::debug!(job = %id, "job cancellation requested");
        Ok(entry.tx.borrow().clone())
    }

    /// Subscribes to a job's status snapshots.
    ///
    /// The stream yields the current snapshot first, then every observed
    /// transition, and ends right after the first terminal snapshot. Slow
    /// consumers coalesce to the latest snapshot but always receive the
    /// terminal one; a job that is already terminal yields exactly one
    /// snapshot.
    pub fn subscribe(&self, id: &Id) -> Result<impl Stream<Item = Job> + Send + use<>, Error> {
        let rx = self.inner
            .jobs
            .get(id)
            .map(|entry| entry.tx.subscribe())
            .ok_or_else(|| Error::new(
                ErrorKind::NotFound,
                format!("job not found: {id}")))?;

        Ok(stream::unfold((rx, true, false), |(mut rx, first, done)| async move {
            if done {
                return None;
            }
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let job = rx.borrow_and_update().clone();
            let done = job.status.is_terminal();
            Some((job, (rx, false, done)))
        }))
    }

    /// Stops the scheduler.
    ///
    /// Refuses further submissions, signals cancellation to every
    /// outstanding job and waits for the runners to settle. Jobs still
    /// waiting for admission become `canceled`; running work that ignores
    /// its token runs to completion.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.semaphore.close();

        for entry in self.inner.jobs.iter() {
            entry.token.cancel();
        }

        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        tracing::debug!("scheduler stopped");
    }
}

impl Inner {
    /// Applies a mutation to a job record unless it is already terminal,
    /// broadcasting the new snapshot to subscribers
    fn update(&self, id: &Id, f: impl FnOnce(&mut Job)) {
        if let Some(entry) = self.jobs.get(id) {
            entry.tx.send_if_modified(|job| {
                if job.status.is_terminal() {
                    return false;
                }
                f(job);
                true
            });
        }
    }

    async fn run<F, Fut>(
        inner: Arc<Self>,
        id: Id,
        token: CancellationToken,
        work: F,
        ctx: JobContext
    )
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Completion, Error>> + Send + 'static,
    {
        // Admission: FIFO under saturation. The biased order makes
        // cancellation before admission deterministic, so a canceled
        // pending job is never marked running.
        let semaphore = inner.semaphore.clone();
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => {
                inner.update(&id, |job| job.cancel());
                tracing::debug!(job = %id, "job canceled before admission");
                return;
            }
            permit = semaphore.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    inner.update(&id, |job| job.cancel());
                    return;
                }
            }
        };

        inner.update(&id, |job| job.start());
        tracing::debug!(job = %id, "job admitted");

        let outcome = AssertUnwindSafe(work(ctx)).catch_unwind().await;

        inner.update(&id, |job| match outcome {
            Ok(Ok(Completion::Finished)) => job.complete(),
            Ok(Ok(Completion::Canceled)) => job.cancel(),
            Ok(Err(ref err)) => {
                tracing::warn!(job = %id, error = %err, "job failed");
                job.fail(err);
            }
            Err(payload) => {
                let err = Error::new(
                    ErrorKind::Internal,
                    format!("work unit panicked: {}", panic_message(payload)));
                tracing::warn!(job = %id, error = %err, "job failed");
                job.fail(&err);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use futures_util::StreamExt;
    use super::*;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    async fn wait_terminal(scheduler: &Scheduler, id: &Id) -> Job {
        for _ in 0..1000 {
            let job = scheduler.get(id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job did not reach a terminal state");
    }

    async fn wait_running(scheduler: &Scheduler, id: &Id) {
        for _ in 0..1000 {
            if scheduler.get(id).unwrap().status == JobStatus::Running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("job was not admitted");
    }

    #[tokio::test]
    async fn it_completes_submitted_job() {
        let scheduler = Scheduler::new();

        let id = scheduler
            .submit(|_| async move { Ok(Completion::Finished) })
            .unwrap();

        let job = wait_terminal(&scheduler, &id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_some());
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn it_fails_job_on_error() {
        let scheduler = Scheduler::new();

        let id = scheduler
            .submit(|_| async move {
                Err::<Completion, _>(Error::new(ErrorKind::Internal, "artifact write exploded"))
            })
            .unwrap();

        let job = wait_terminal(&scheduler, &id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("artifact write exploded"));
        assert!(job.traceback.as_deref().unwrap().contains("artifact write exploded"));
    }

    #[tokio::test]
    async fn it_fails_job_on_panic() {
        let scheduler = Scheduler::new();

        let id = scheduler
            .submit(|_| async move {
                if Id::new().to_string().len() == 26 {
                    panic!("unexpected");
                }
                Ok(Completion::Finished)
            })
            .unwrap();

        let job = wait_terminal(&scheduler, &id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("unexpected"));
    }

    #[tokio::test]
    async fn it_cancels_pending_job_without_running() {
        let scheduler = Scheduler::with_options(SchedulerOptions::new()
            .with_max_concurrency(1));

        let blocker = scheduler
            .submit(|ctx| async move {
                ctx.cancelled().await;
                Ok(Completion::Canceled)
            })
            .unwrap();
        wait_running(&scheduler, &blocker).await;

        // queued behind the blocker, never admitted
        let queued = scheduler
            .submit(|_| async move { Ok(Completion::Finished) })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scheduler.get(&queued).unwrap().status, JobStatus::Pending);
        scheduler.cancel(&queued).unwrap();

        let job = wait_terminal(&scheduler, &queued).await;
        assert_eq!(job.status, JobStatus::Canceled);
        assert!(job.started_at.is_none());

        scheduler.cancel(&blocker).unwrap();
        wait_terminal(&scheduler, &blocker).await;
    }

    #[tokio::test]
    async fn it_cancels_running_job_cooperatively() {
        let scheduler = Scheduler::new();

        let id = scheduler
            .submit(|ctx| async move {
                tokio::select! {
                    _ = ctx.cancelled() => Ok(Completion::Canceled),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(Completion::Finished),
                }
            })
            .unwrap();

        wait_running(&scheduler, &id).await;
        scheduler.cancel(&id).unwrap();
        let job = wait_terminal(&scheduler, &id).await;

        assert_eq!(job.status, JobStatus::Canceled);
        assert!(job.started_at.is_some());
    }

    #[tokio::test]
    async fn it_ignores_cancel_on_terminal_job() {
        let scheduler = Scheduler::new();

        let id = scheduler
            .submit(|_| async move { Ok(Completion::Finished) })
            .unwrap();
        wait_terminal(&scheduler, &id).await;

        let job = scheduler.cancel(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        // still completed afterwards
        assert_eq!(scheduler.get(&id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn it_is_idempotent_on_repeated_cancel() {
        let scheduler = Scheduler::with_options(SchedulerOptions::new()
            .with_max_concurrency(1));

        let blocker = scheduler
            .submit(|ctx| async move {
                ctx.cancelled().await;
                Ok(Completion::Canceled)
            })
            .unwrap();

        scheduler.cancel(&blocker).unwrap();
        scheduler.cancel(&blocker).unwrap();

        let job = wait_terminal(&scheduler, &blocker).await;
        assert_eq!(job.status, JobStatus::Canceled);
    }

    #[tokio::test]
    async fn it_enforces_concurrency_cap() {
        init_tracing();
        let scheduler = Scheduler::with_options(SchedulerOptions::new()
            .with_max_concurrency(2));

        let ids = (0..5)
            .map(|_| scheduler
                .submit(|_| async move {
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    Ok(Completion::Finished)
                })
                .unwrap())
            .collect::<Vec<_>>();

        let mut max_running = 0;
        loop {
            let running = scheduler
                .list(&JobFilter::default().with_status(JobStatus::Running))
                .len();
            max_running = max_running.max(running);

            let done = ids
                .iter()
                .filter(|id| scheduler.get(id).unwrap().status.is_terminal())
                .count();
            if done == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(max_running <= 2, "observed {max_running} running jobs");
        for id in &ids {
            assert_eq!(scheduler.get(id).unwrap().status, JobStatus::Completed);
        }
    }

    #[tokio::test]
    async fn it_streams_status_until_terminal() {
        let scheduler = Scheduler::new();

        let id = scheduler
            .submit(|_| async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(Completion::Finished)
            })
            .unwrap();

        let mut stream = Box::pin(scheduler.subscribe(&id).unwrap());
        let mut snapshots = Vec::new();
        while let Some(job) = stream.next().await {
            snapshots.push(job);
        }

        let terminal = snapshots
            .iter()
            .filter(|job| job.status.is_terminal())
            .count();
        assert_eq!(terminal, 1);
        assert_eq!(snapshots.last().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn it_emits_single_snapshot_for_terminal_job() {
        let scheduler = Scheduler::new();

        let id = scheduler
            .submit(|_| async move { Ok(Completion::Finished) })
            .unwrap();
        wait_terminal(&scheduler, &id).await;

        let mut stream = Box::pin(scheduler.subscribe(&id).unwrap());
        let first = stream.next().await.unwrap();
        assert_eq!(first.status, JobStatus::Completed);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn it_lists_jobs_with_status_filter() {
        let scheduler = Scheduler::new();

        let done = scheduler
            .submit(|_| async move { Ok(Completion::Finished) })
            .unwrap();
        wait_terminal(&scheduler, &done).await;

        let held = scheduler
            .submit(|ctx| async move {
                ctx.cancelled().await;
                Ok(Completion::Canceled)
            })
            .unwrap();

        let completed = scheduler.list(&JobFilter::default()
            .with_status(JobStatus::Completed));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done);

        assert_eq!(scheduler.list(&JobFilter::default()).len(), 2);

        scheduler.cancel(&held).unwrap();
        wait_terminal(&scheduler, &held).await;
    }

    #[tokio::test]
    async fn it_fails_with_not_found_for_unknown_job() {
        let scheduler = Scheduler::new();
        let id = Id::new();

        assert_eq!(scheduler.get(&id).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(scheduler.cancel(&id).unwrap_err().kind(), ErrorKind::NotFound);
        assert!(scheduler.subscribe(&id).is_err());
    }

    #[tokio::test]
    async fn it_rejects_submission_after_stop() {
        let scheduler = Scheduler::new();
        scheduler.stop().await;

        let result = scheduler.submit(|_| async move { Ok(Completion::Finished) });
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn it_cancels_outstanding_work_on_stop() {
        let scheduler = Scheduler::with_options(SchedulerOptions::new()
            .with_max_concurrency(1));

        let running = scheduler
            .submit(|ctx| async move {
                ctx.cancelled().await;
                Ok(Completion::Canceled)
            })
            .unwrap();
        wait_running(&scheduler, &running).await;

        let queued = scheduler
            .submit(|_| async move { Ok(Completion::Finished) })
            .unwrap();

        scheduler.stop().await;

        assert_eq!(scheduler.get(&running).unwrap().status, JobStatus::Canceled);
        assert_eq!(scheduler.get(&queued).unwrap().status, JobStatus::Canceled);
    }

    #[tokio::test]
    async fn it_links_artifact_before_terminal_transition() {
        let scheduler = Scheduler::new();
        let artifact_id = Id::new();

        let id = scheduler
            .submit(move |ctx| async move {
                ctx.attach_artifact(artifact_id);
                Ok(Completion::Finished)
            })
            .unwrap();

        let job = wait_terminal(&scheduler, &id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.artifact_id, Some(artifact_id));
    }

    #[tokio::test]
    async fn it_keeps_terminal_record_immutable() {
        let scheduler = Scheduler::new();

        let id = scheduler
            .submit(|ctx| async move {
                ctx.attach_artifact(Id::new());
                Ok(Completion::Finished)
            })
            .unwrap();
        let job = wait_terminal(&scheduler, &id).await;

        // a late attach is dropped by the terminal guard
        scheduler.inner.update(&id, |j| j.artifact_id = None);
        assert_eq!(scheduler.get(&id).unwrap().artifact_id, job.artifact_id);
    }
}
