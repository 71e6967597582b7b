//! DRMAA-like sessions.
//!
//! A [`Session`] is a named handle through which jobs are submitted, queried and controlled.
//! It owns the [`Job`] handles created within it. Backends implement [`SessionBackend`], so
//! callers never depend on how a session talks to the batch system.
pub mod cli;
pub mod manager;

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gridengine::ControlAction;
use crate::gridengine::parse::{AccountingRecord, BackendInfo, JobDetail, JobProgramStatus};
use crate::gridengine::template::{ArrayParams, JobTemplate};
use crate::{JobId, Map};

pub use cli::{CliBackend, CliSession};
pub use manager::{Readiness, SessionManager, SessionManagerRef};

pub type SessionFuture<T> = Pin<Box<dyn Future<Output = crate::Result<T>>>>;

/// Statuses of the queried jobs that are still known to the backend.
/// A job missing from the map has left the batch system.
pub type JobStatusMap = Map<JobId, crate::Result<JobProgramStatus>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Single,
    Array,
}

/// Handle of a job submitted through a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: JobId,
    pub job_type: JobType,
    pub template: JobTemplate,
    pub array: Option<ArrayParams>,
    pub submitted_at: DateTime<Utc>,
}

pub trait Session {
    fn name(&self) -> &str;

    /// Submits a single job and returns its id.
    fn run_job(&self, template: &JobTemplate) -> SessionFuture<JobId>;

    /// Submits an array job with tasks `start..=end` stepping by `increment`.
    fn run_bulk_jobs(
        &self,
        template: &JobTemplate,
        start: u32,
        end: u32,
        increment: u32,
    ) -> SessionFuture<JobId>;

    /// Queries the status of several jobs at once to amortize the query cost.
    fn get_job_program_status(&self, job_ids: &[JobId]) -> SessionFuture<JobStatusMap>;

    fn control(&self, job_id: &str, action: ControlAction) -> SessionFuture<()>;

    fn job_detail(&self, job_id: &str) -> SessionFuture<JobDetail>;

    /// Accounting records of a finished job, `None` if they are not available yet.
    fn accounting(&self, job_id: &str) -> SessionFuture<Option<Vec<AccountingRecord>>>;

    fn jobs(&self) -> Vec<Job>;

    /// Drops the handle of a job that is no longer tracked.
    fn release_job(&self, job_id: &str);

    /// Releases all job handles owned by the session.
    fn close(&self);
}

/// Creates sessions of one kind of batch system.
pub trait SessionBackend {
    /// Probes the batch system; success makes the session manager ready.
    fn backend_info(&self) -> SessionFuture<BackendInfo>;

    fn open_session(&self, name: &str) -> Rc<dyn Session>;
}
