use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::timer::JobHandle;

/// Process-unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// How a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Repeats on every slot of a trigger expression until disarmed.
    Cron,
    /// Fires once, then removes itself from the registry.
    Timeout,
}

/// A live runtime timer owned by the registry. Never persisted.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub schedule_id: String,
    pub kind: JobKind,
    pub handle: JobHandle,
    pub armed_at: DateTime<Utc>,
}

/// Read-only view of a registered job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub armed_at: DateTime<Utc>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind,
            armed_at: job.armed_at,
        }
    }
}

/// Map from schedule id to the jobs currently armed for it.
///
/// The registry is the only owner of job handles; cancelling a timer means
/// going through [`JobRegistry::cancel_all`].
#[derive(Default)]
pub struct JobRegistry {
    entries: Mutex<HashMap<String, Vec<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job to its schedule's entry, creating the entry if needed.
    pub fn insert(&self, job: Job) {
        let mut entries = self.entries.lock().expect("job registry poisoned");
        debug!(schedule_id = %job.schedule_id, job_id = %job.id, kind = ?job.kind, "job registered");
        entries.entry(job.schedule_id.clone()).or_default().push(job);
    }

    /// Cancel every job for `schedule_id` and drop the entry.
    ///
    /// Returns the number of jobs cancelled; `0` for an unknown id.
    pub fn cancel_all(&self, schedule_id: &str) -> usize {
        let removed = self
            .entries
            .lock()
            .expect("job registry poisoned")
            .remove(schedule_id);
        let Some(jobs) = removed else {
            return 0;
        };
        for job in &jobs {
            job.handle.cancel();
        }
        jobs.len()
    }

    /// Snapshots of the jobs registered for `schedule_id`, in arming order.
    pub fn get(&self, schedule_id: &str) -> Vec<JobSnapshot> {
        self.entries
            .lock()
            .expect("job registry poisoned")
            .get(schedule_id)
            .map(|jobs| jobs.iter().map(JobSnapshot::from).collect())
            .unwrap_or_default()
    }

    /// Drop a single job that has already fired. Does not cancel anything
    /// and never creates an entry.
    pub(crate) fn remove_job(&self, schedule_id: &str, job_id: JobId) -> bool {
        self.take_job(schedule_id, job_id).is_some()
    }

    /// Cancel and drop one job, leaving its siblings alone. `false` if the job
    /// is no longer registered (already disarmed or replaced by a rearm).
    pub(crate) fn cancel_job(&self, schedule_id: &str, job_id: JobId) -> bool {
        match self.take_job(schedule_id, job_id) {
            Some(job) => {
                job.handle.cancel();
                true
            }
            None => false,
        }
    }

    fn take_job(&self, schedule_id: &str, job_id: JobId) -> Option<Job> {
        let mut entries = self.entries.lock().expect("job registry poisoned");
        let jobs = entries.get_mut(schedule_id)?;
        let position = jobs.iter().position(|j| j.id == job_id)?;
        let job = jobs.remove(position);
        if jobs.is_empty() {
            entries.remove(schedule_id);
        }
        Some(job)
    }

    /// Ids with at least one registered job, sorted.
    pub fn schedule_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .lock()
            .expect("job registry poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, schedule_id: &str) -> bool {
        self.entries
            .lock()
            .expect("job registry poisoned")
            .contains_key(schedule_id)
    }

    /// Total number of registered jobs across all schedules.
    pub fn job_count(&self) -> usize {
        self.entries
            .lock()
            .expect("job registry poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }
}
