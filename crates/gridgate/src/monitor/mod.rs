//! Supervision of submitted jobs.
//!
//! Every tracked job is polled periodically. A job moves `Queued -> Running -> Completed`, can
//! fall into `Error` and is forcibly `Terminated` once it stays queued or running longer than
//! its budget. Jobs in a terminal status stop being tracked.
mod descriptor;
mod process;
mod state;

use std::time::Duration;

use crate::config::Config;
use crate::gridengine::{JobProgramStatus, JobStatus};
use crate::session::JobType;

pub use descriptor::{JobDescriptor, TaskInfo};
pub use process::poll_tracked_jobs;
pub use state::{DEFAULT_HISTORY_SIZE, JobMonitor, JobMonitorRef};

/// How long a job may stay queued or running before it is terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTimeLimits {
    pub queued: Duration,
    pub running: Duration,
    pub array_queued: Duration,
    pub array_running: Duration,
}

impl JobTimeLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queued: config.max_job_queued_time(),
            running: config.max_job_running_time(),
            array_queued: config.max_array_job_queued_time(),
            array_running: config.max_array_job_running_time(),
        }
    }

    /// Budget for the given status, `None` if the status is not time limited.
    pub fn budget(&self, job_type: JobType, status: JobStatus) -> Option<Duration> {
        match (job_type, status) {
            (JobType::Single, JobStatus::Queued) => Some(self.queued),
            (JobType::Single, JobStatus::Running) => Some(self.running),
            (JobType::Array, JobStatus::Queued) => Some(self.array_queued),
            (JobType::Array, JobStatus::Running) => Some(self.array_running),
            _ => None,
        }
    }
}

/// Status of the whole job derived from what the grid engine reports.
///
/// For array jobs, a running task makes the job running and a queued task makes it queued.
pub fn derive_job_status(status: &JobProgramStatus) -> JobStatus {
    if status.tasks.is_empty() || status.status == JobStatus::Error {
        return status.status;
    }
    let any = |expected: JobStatus| status.tasks.iter().any(|(_, s)| *s == expected);
    let all = |allowed: &[JobStatus]| status.tasks.iter().all(|(_, s)| allowed.contains(s));

    if any(JobStatus::Running) {
        JobStatus::Running
    } else if any(JobStatus::Queued) {
        JobStatus::Queued
    } else if all(&[JobStatus::OnHold]) {
        JobStatus::OnHold
    } else if all(&[JobStatus::OnHold, JobStatus::Suspended]) {
        JobStatus::Suspended
    } else {
        JobStatus::Undetermined
    }
}
