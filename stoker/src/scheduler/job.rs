//! Job records and lifecycle states

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::Error;
use crate::id::Id;

/// The lifecycle state of a job.
///
/// ```text
/// pending ──admit──▶ running ──ok──▶ completed
///    │                  │
///    │                  └──err──▶ failed
///    │                  │
///    │                  └──cancel──▶ canceled
///    └──cancel──▶ canceled
/// ```
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Submitted, waiting for admission.
    #[default]
    Pending,

    /// Admitted and currently executing.
    Running,

    /// The work unit ran to completion.
    Completed,

    /// An error escaped the work unit.
    Failed,

    /// Canceled before admission, or the work unit observed
    /// cancellation and returned.
    Canceled,
}

impl JobStatus {
    /// Returns whether the status is terminal
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled)
    }
}

/// The scheduler's per-submission bookkeeping record.
///
/// Jobs live in process memory only; they are not persisted across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// The job identifier.
    pub id: Id,

    /// Current lifecycle state.
    pub status: JobStatus,

    /// The artifact produced by the work unit, once linked.
    pub artifact_id: Option<Id>,

    /// The error message when the job failed.
    pub error: Option<String>,

    /// The textual trace captured alongside the error.
    #[serde(rename = "error_traceback")]
    pub traceback: Option<String>,

    /// When the job was submitted.
    pub submitted_at: DateTime<Utc>,

    /// When the job was admitted.
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a new [`Job`] in `pending` state
    pub(crate) fn new() -> Self {
        Self {
            id: Id::new(),
            status: JobStatus::Pending,
            artifact_id: None,
            error: None,
            traceback: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Marks the job admitted
    pub(crate) fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Marks the job `completed`
    pub(crate) fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the job `failed`, capturing the error and its trace
    pub(crate) fn fail(&mut self, error: &Error) {
        self.status = JobStatus::Failed;
        self.error = Some(error.to_string());
        self.traceback = Some(error.trace());
        self.finished_at = Some(Utc::now());
    }

    /// Marks the job `canceled`
    pub(crate) fn cancel(&mut self) {
        self.status = JobStatus::Canceled;
        self.finished_at = Some(Utc::now());
    }
}

/// Listing filter for jobs
#[derive(Default, Debug, Clone)]
pub struct JobFilter {
    /// Keep only jobs in this state.
    pub status: Option<JobStatus>,
}

impl JobFilter {
    /// Keeps only jobs in the given state
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// The terminal outcome reported by a work unit.
///
/// Errors are reported separately through the work unit's `Result`; a panic
/// escaping the work unit is converted to a failure at the runner boundary.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Completion {
    /// The work unit ran to its end.
    Finished,

    /// The work unit observed cancellation and returned early.
    Canceled,
}
