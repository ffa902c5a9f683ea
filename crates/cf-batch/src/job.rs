//! Jobs and their handles.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use cf_core::JobId;
use cf_pipeline::{ExecutionResult, Pipeline};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::scheduler::Inner;

/// A pipeline queued for execution.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub pipeline: Pipeline,
    /// Higher runs first. Equal priorities run in submission order.
    pub priority: i32,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            id: JobId::new(),
            pipeline,
            priority: 0,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Queue key: priority descending, then submission sequence ascending.
/// The id breaks remaining ties so the ordering agrees with `Eq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueKey {
    pub priority: i32,
    pub seq: u64,
    pub id: JobId,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Completion signal of a submitted job.
pub struct JobHandle {
    pub(crate) id: JobId,
    pub(crate) result: oneshot::Receiver<ExecutionResult>,
    pub(crate) inner: Arc<Inner>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Remove the job from the queue, or stop it if it is running.
    pub fn cancel(&self) -> bool {
        self.inner.cancel(self.id)
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.inner.status(self.id)
    }

    /// Wait for the job's result.
    pub async fn wait(self) -> ExecutionResult {
        match self.result.await {
            Ok(result) => result,
            Err(_) => ExecutionResult::failed(
                &cf_core::Error::Internal(format!("job {} was dropped without a result", self.id)),
                Vec::new(),
            ),
        }
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}
