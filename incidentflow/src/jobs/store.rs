//! Concurrency-safe job storage.

use super::{JobRecord, JobSummary, JobTransition, Submission};
use crate::core::JobId;
use crate::errors::{IncidentflowError, Result};
use dashmap::DashMap;
use tracing::debug;

/// Owns the mapping from job identifier to [`JobRecord`].
///
/// Reads return cloned snapshots. Updates run under the entry's shard lock,
/// so a transition is validated and applied atomically with respect to
/// concurrent readers.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: DashMap<JobId, JobRecord>,
}

impl JobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new queued job and returns its identifier.
    pub fn create(&self) -> JobId {
        self.insert(None)
    }

    /// Allocates a new queued job remembering what was submitted.
    pub fn create_for(&self, submission: Submission) -> JobId {
        self.insert(Some(submission))
    }

    fn insert(&self, submission: Option<Submission>) -> JobId {
        let id = JobId::new();
        self.jobs.insert(id, JobRecord::new(id, submission));
        debug!(job_id = %id, "Job created");
        id
    }

    /// Returns a snapshot of the job's record.
    pub fn get(&self, id: JobId) -> Result<JobRecord> {
        self.jobs
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(IncidentflowError::NotFound(id))
    }

    /// Applies `transition` atomically and returns the updated snapshot.
    pub fn update(&self, id: JobId, transition: JobTransition) -> Result<JobRecord> {
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or(IncidentflowError::NotFound(id))?;

        let name = transition.name();
        entry.apply(transition)?;
        debug!(job_id = %id, transition = name, status = %entry.status, "Job updated");
        Ok(entry.value().clone())
    }

    /// Returns true if the job exists.
    #[must_use]
    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    /// Summaries of every job, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<JobSummary> {
        let mut summaries: Vec<_> = self.jobs.iter().map(|entry| entry.summary()).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// Returns the number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if no jobs exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
