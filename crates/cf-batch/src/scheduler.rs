//! Bounded worker pool behind a priority queue.
//!
//! [`Scheduler::submit`] never blocks: it records the job, pushes it on the
//! queue and wakes the dispatcher. The dispatcher holds one semaphore permit
//! per running job, so at most `workers` pipelines execute at once. Each job
//! runs in its own task; a panic or failure there is turned into that job's
//! result and never reaches its siblings.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cf_core::config::SchedulerConfig;
use cf_core::events::{EventBus, EventPayload};
use cf_core::{ErrorKind, JobId};
use cf_pipeline::{Engine, ExecutionResult, ExecutionStatus, Pipeline};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::job::{Job, JobHandle, JobStatus, QueueKey};

/// Finished jobs whose final status stays queryable.
const HISTORY_LIMIT: usize = 1024;

/// What the scheduler runs jobs with.
#[async_trait]
pub trait PipelineRunner: Send + Sync + 'static {
    async fn run(&self, pipeline: &Pipeline, label: &str, cancel: CancellationToken) -> ExecutionResult;
}

#[async_trait]
impl PipelineRunner for Engine {
    async fn run(&self, pipeline: &Pipeline, label: &str, cancel: CancellationToken) -> ExecutionResult {
        self.run_labeled(pipeline, label, cancel).await
    }
}

struct Entry {
    status: JobStatus,
    /// Taken by the dispatcher when the job starts.
    job: Option<Job>,
    cancel: CancellationToken,
    done: Option<oneshot::Sender<ExecutionResult>>,
}

pub(crate) struct Inner {
    runner: Arc<dyn PipelineRunner>,
    // Lock order: `jobs` before `queue` before `history`.
    /// Queued and running jobs only.
    jobs: Mutex<HashMap<JobId, Entry>>,
    queue: Mutex<BinaryHeap<QueueKey>>,
    /// Final statuses of the most recently finished jobs, oldest first.
    history: Mutex<VecDeque<(JobId, JobStatus)>>,
    seq: AtomicU64,
    wake: Notify,
    events: Arc<EventBus>,
    shutdown: CancellationToken,
}

impl Inner {
    pub(crate) fn status(&self, id: JobId) -> Option<JobStatus> {
        if let Some(entry) = self.jobs.lock().get(&id) {
            return Some(entry.status);
        }
        self.history
            .lock()
            .iter()
            .rev()
            .find(|(finished, _)| *finished == id)
            .map(|(_, status)| *status)
    }

    fn remember(&self, id: JobId, status: JobStatus) {
        let mut history = self.history.lock();
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back((id, status));
    }

    pub(crate) fn cancel(&self, id: JobId) -> bool {
        let mut jobs = self.jobs.lock();
        let Some(entry) = jobs.get_mut(&id) else {
            return false;
        };
        let status = entry.status;
        match status {
            JobStatus::Queued => {
                entry.cancel.cancel();
                let done = entry.done.take();
                jobs.remove(&id);
                self.queue.lock().retain(|k| k.id != id);
                self.remember(id, JobStatus::Cancelled);
                drop(jobs);
                if let Some(done) = done {
                    let _ = done.send(ExecutionResult::failed(&cf_core::Error::Cancelled, Vec::new()));
                }
                tracing::info!(job_id = %id, "queued job cancelled");
                self.events.broadcast(EventPayload::JobCancelled { job_id: id });
                true
            }
            JobStatus::Running => {
                tracing::info!(job_id = %id, "cancelling running job");
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Next runnable job, skipping entries cancelled while queued.
    fn pop(&self) -> Option<(Job, CancellationToken, oneshot::Sender<ExecutionResult>)> {
        loop {
            let key = self.queue.lock().pop()?;
            let mut jobs = self.jobs.lock();
            let Some(entry) = jobs.get_mut(&key.id) else {
                continue;
            };
            if entry.status != JobStatus::Queued {
                continue;
            }
            let (Some(job), Some(done)) = (entry.job.take(), entry.done.take()) else {
                continue;
            };
            entry.status = JobStatus::Running;
            return Some((job, entry.cancel.clone(), done));
        }
    }

    /// Drop a finished job, keeping only its final status.
    fn finish(&self, id: JobId, status: JobStatus) {
        let mut jobs = self.jobs.lock();
        jobs.remove(&id);
        self.remember(id, status);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.jobs.lock().len()
    }
}

/// Runs submitted pipelines on a bounded worker pool.
pub struct Scheduler {
    inner: Arc<Inner>,
    workers: usize,
}

impl Scheduler {
    /// Start the scheduler. Must be called from within a Tokio runtime.
    pub fn new(runner: Arc<dyn PipelineRunner>, config: &SchedulerConfig) -> Self {
        let workers = config.workers.filter(|w| *w > 0).unwrap_or_else(num_cpus::get);
        let inner = Arc::new(Inner {
            runner,
            jobs: Mutex::new(HashMap::new()),
            queue: Mutex::new(BinaryHeap::new()),
            history: Mutex::new(VecDeque::new()),
            seq: AtomicU64::new(0),
            wake: Notify::new(),
            events: Arc::new(EventBus::new(config.event_capacity)),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(dispatch(inner.clone(), Arc::new(Semaphore::new(workers))));
        tracing::debug!(workers, "scheduler started");
        Self { inner, workers }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.inner.events.clone()
    }

    /// Queue a job. Returns immediately.
    pub fn submit(&self, job: Job) -> JobHandle {
        let id = job.id;
        let priority = job.priority;
        let (tx, rx) = oneshot::channel();

        if self.inner.shutdown.is_cancelled() {
            let _ = tx.send(ExecutionResult::failed(&cf_core::Error::Cancelled, Vec::new()));
            return JobHandle {
                id,
                result: rx,
                inner: self.inner.clone(),
            };
        }

        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        self.inner.jobs.lock().insert(
            id,
            Entry {
                status: JobStatus::Queued,
                job: Some(job),
                cancel: CancellationToken::new(),
                done: Some(tx),
            },
        );
        self.inner.queue.lock().push(QueueKey { priority, seq, id });
        tracing::info!(job_id = %id, priority, "job queued");
        self.inner.events.broadcast(EventPayload::JobQueued { job_id: id, priority });
        self.inner.wake.notify_one();

        JobHandle {
            id,
            result: rx,
            inner: self.inner.clone(),
        }
    }

    /// Cancel a queued or running job. Returns `false` for unknown or
    /// finished jobs.
    pub fn cancel(&self, id: JobId) -> bool {
        self.inner.cancel(id)
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.inner.status(id)
    }

    /// Number of jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Submit every job and wait for all of them. Results come back in
    /// submission order.
    pub async fn run_all(&self, jobs: Vec<Job>) -> Vec<ExecutionResult> {
        let handles: Vec<JobHandle> = jobs.into_iter().map(|job| self.submit(job)).collect();
        futures::future::join_all(handles.into_iter().map(JobHandle::wait)).await
    }

    /// Stop accepting work and cancel every queued job. Running jobs finish.
    /// Returns the number of jobs cancelled.
    pub fn shutdown(&self) -> usize {
        self.inner.shutdown.cancel();
        let queued: Vec<JobId> = self.inner.queue.lock().iter().map(|k| k.id).collect();
        let cancelled = queued.into_iter().filter(|id| self.inner.cancel(*id)).count();
        tracing::info!(cancelled, "scheduler shut down");
        cancelled
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn dispatch(inner: Arc<Inner>, permits: Arc<Semaphore>) {
    loop {
        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = inner.shutdown.cancelled() => return,
        };

        let (job, cancel, done) = loop {
            if let Some(next) = inner.pop() {
                break next;
            }
            tokio::select! {
                _ = inner.wake.notified() => {}
                _ = inner.shutdown.cancelled() => return,
            }
        };

        let inner = inner.clone();
        tokio::spawn(async move {
            let _permit = permit;
            run_job(&inner, job, cancel, done).await;
        });
    }
}

async fn run_job(
    inner: &Inner,
    job: Job,
    cancel: CancellationToken,
    done: oneshot::Sender<ExecutionResult>,
) {
    let id = job.id;
    tracing::info!(job_id = %id, "job started");
    inner.events.broadcast(EventPayload::JobStarted { job_id: id });

    let label = id.short();
    let run = inner.runner.run(&job.pipeline, &label, cancel);
    let result = match AssertUnwindSafe(run).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(job_id = %id, "job panicked");
            ExecutionResult::failed(&cf_core::Error::Internal("job panicked".into()), Vec::new())
        }
    };

    let status = match (result.status, result.error_kind()) {
        (ExecutionStatus::Failed, Some(ErrorKind::Cancelled)) => JobStatus::Cancelled,
        (ExecutionStatus::Failed, _) => JobStatus::Failed,
        _ => JobStatus::Completed,
    };
    inner.finish(id, status);

    let payload = match status {
        JobStatus::Cancelled => EventPayload::JobCancelled { job_id: id },
        JobStatus::Failed => {
            let error = result
                .diagnostics
                .iter()
                .rev()
                .find(|d| d.severity == cf_pipeline::Severity::Error)
                .map(|d| d.message.clone())
                .unwrap_or_default();
            tracing::warn!(job_id = %id, error = %error, "job failed");
            EventPayload::JobFailed {
                job_id: id,
                kind: result.error_kind().unwrap_or(ErrorKind::Internal),
                error,
            }
        }
        _ => {
            tracing::info!(job_id = %id, status = %result.status, "job completed");
            EventPayload::JobCompleted {
                job_id: id,
                fallback: result.status == ExecutionStatus::FallbackSuccess,
            }
        }
    };
    inner.events.broadcast(payload);

    // The handle may have been dropped.
    let _ = done.send(result);
}
