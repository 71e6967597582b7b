use std::time::Duration;

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::common::time::{
    elapsed_between, serialize_duration_millis, serialize_duration_millis_opt,
};
use crate::gridengine::JobStatus;
use crate::gridengine::template::ArrayParams;
use crate::session::JobType;
use crate::{JobId, Map};

/// Larger array jobs start with an empty `task_info` that is filled from the reported tasks.
pub const MAX_PREALLOCATED_TASKS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task_id: u32,
    pub status: JobStatus,
    /// Time spent in the current status.
    #[serde(serialize_with = "serialize_duration_millis")]
    pub running_time: Duration,
    /// When the task entered its current status.
    #[serde(with = "ts_milliseconds")]
    pub running_start: DateTime<Utc>,
}

impl TaskInfo {
    pub fn new(task_id: u32, now: DateTime<Utc>) -> Self {
        Self {
            task_id,
            status: JobStatus::Queued,
            running_time: Duration::ZERO,
            running_start: now,
        }
    }

    /// Returns true if the status has changed.
    pub fn update(&mut self, status: JobStatus, now: DateTime<Utc>) -> bool {
        if self.status != status {
            self.status = status;
            self.running_start = now;
            self.running_time = Duration::ZERO;
            true
        } else {
            self.running_time = elapsed_between(self.running_start, now);
            false
        }
    }
}

/// A job tracked by the monitor from submission until it reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub job_id: JobId,
    pub job_name: String,
    pub job_type: JobType,
    pub job_status: JobStatus,
    pub first_task_id: Option<u32>,
    pub last_task_id: Option<u32>,
    pub increment: Option<u32>,
    pub task_info: Vec<TaskInfo>,
    pub user: String,
    /// Submission time, moved to the time of the last status change.
    #[serde(with = "ts_milliseconds")]
    pub submit_date: DateTime<Utc>,
    #[serde(serialize_with = "serialize_duration_millis_opt")]
    pub total_execution_time: Option<Duration>,
    pub session_name: String,
    pub exit_status: Option<i32>,
}

impl JobDescriptor {
    pub fn new(
        job_id: JobId,
        job_name: String,
        array: Option<&ArrayParams>,
        user: String,
        session_name: String,
        submit_date: DateTime<Utc>,
    ) -> Self {
        let (job_type, task_info) = match array {
            Some(array) if array.task_count() <= MAX_PREALLOCATED_TASKS => (
                JobType::Array,
                array
                    .task_ids()
                    .map(|task_id| TaskInfo::new(task_id, submit_date))
                    .collect(),
            ),
            Some(_) => (JobType::Array, vec![]),
            None => (JobType::Single, vec![]),
        };
        Self {
            job_id,
            job_name,
            job_type,
            job_status: JobStatus::Queued,
            first_task_id: array.map(|a| a.start),
            last_task_id: array.map(|a| a.end),
            increment: array.map(|a| a.increment),
            task_info,
            user,
            submit_date,
            total_execution_time: None,
            session_name,
            exit_status: None,
        }
    }

    pub fn is_array(&self) -> bool {
        self.job_type == JobType::Array
    }

    /// Time spent in the current status.
    pub fn time_in_status(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(self.submit_date, now)
    }

    /// Returns true if the status has changed.
    pub fn set_status(&mut self, status: JobStatus, now: DateTime<Utc>) -> bool {
        if self.job_status == status {
            return false;
        }
        log::info!(
            "Job {} ({}) changed status {} -> {}",
            self.job_id,
            self.job_name,
            self.job_status,
            status
        );
        self.job_status = status;
        self.submit_date = now;
        true
    }

    /// Updates per-task statuses of an array job. Tasks missing from `tasks` have finished.
    pub fn update_tasks(&mut self, tasks: &[(u32, JobStatus)], now: DateTime<Utc>) {
        let mut reported: Map<u32, JobStatus> = tasks.iter().copied().collect();
        for task in &mut self.task_info {
            match reported.remove(&task.task_id) {
                Some(status) => {
                    task.update(status, now);
                }
                None if !task.status.is_terminal() => {
                    task.update(JobStatus::Completed, now);
                }
                None => {}
            }
        }
        if !reported.is_empty() {
            self.task_info
                .extend(reported.into_iter().map(|(task_id, status)| {
                    let mut task = TaskInfo::new(task_id, now);
                    task.update(status, now);
                    task
                }));
            self.task_info.sort_unstable_by_key(|task| task.task_id);
        }
    }

    /// Marks every unfinished task with the final status of the whole job.
    pub fn finish_tasks(&mut self, status: JobStatus, now: DateTime<Utc>) {
        for task in &mut self.task_info {
            if !task.status.is_terminal() {
                task.update(status, now);
            }
        }
    }
}
