use std::future::Future;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tokio::task::{JoinHandle, LocalSet};

use crate::admission::audit::{AuditRecord, AuditSink};
use crate::common::error::GridgateError;
use crate::gridengine::parse::{
    AccountingRecord, BackendInfo, DetailValue, ERROR_REASON_KEY, JobDetail,
};
use crate::gridengine::template::{ArrayParams, JobTemplate};
use crate::gridengine::{ControlAction, JobProgramStatus};
use crate::session::{
    Job, JobStatusMap, JobType, Readiness, Session, SessionBackend, SessionFuture, SessionManager,
    SessionManagerRef,
};
use crate::{JobId, Map, WrappedRcRefCell};

pub async fn run_concurrent<
    R: 'static,
    Fut1: 'static + Future<Output = R>,
    Fut2: Future<Output = ()>,
>(
    background_fut: Fut1,
    fut: Fut2,
) -> (LocalSet, JoinHandle<R>) {
    let set = LocalSet::new();
    let handle = set.spawn_local(background_fut);
    set.run_until(fut).await;
    (set, handle)
}

/// Writes an executable shell script that stands in for a grid engine command.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}

/// What the mocked grid engine knows and what it was asked to do.
#[derive(Default)]
pub struct MockSessionState {
    pub next_job_id: u64,
    pub submitted: Vec<(JobTemplate, Option<ArrayParams>)>,
    /// Jobs known to the grid engine; the others are reported as finished.
    pub statuses: Map<JobId, JobProgramStatus>,
    pub accounting: Map<JobId, Vec<AccountingRecord>>,
    pub error_reasons: Map<JobId, Vec<String>>,
    /// Every control attempt, including the failed ones.
    pub controlled: Vec<(JobId, ControlAction)>,
    pub status_queries: usize,
    pub fail_submit: bool,
    pub fail_status: bool,
    pub fail_control: bool,
}

pub struct MockSession {
    name: String,
    state: WrappedRcRefCell<MockSessionState>,
    jobs: WrappedRcRefCell<Vec<Job>>,
}

impl MockSession {
    fn submit(&self, template: &JobTemplate, array: Option<ArrayParams>) -> SessionFuture<JobId> {
        let state = self.state.clone();
        let jobs = self.jobs.clone();
        let template = template.clone();
        Box::pin(async move {
            template.validate()?;
            let mut state = state.get_mut();
            if state.fail_submit {
                return Err(GridgateError::GenericError("qsub failed".to_string()));
            }
            state.next_job_id += 1;
            let job_id = state.next_job_id.to_string();
            state.submitted.push((template.clone(), array));
            jobs.get_mut().push(Job {
                job_id: job_id.clone(),
                job_type: if array.is_some() {
                    JobType::Array
                } else {
                    JobType::Single
                },
                template,
                array,
                submitted_at: chrono::Utc::now(),
            });
            Ok(job_id)
        })
    }
}

impl Session for MockSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_job(&self, template: &JobTemplate) -> SessionFuture<JobId> {
        self.submit(template, None)
    }

    fn run_bulk_jobs(
        &self,
        template: &JobTemplate,
        start: u32,
        end: u32,
        increment: u32,
    ) -> SessionFuture<JobId> {
        match ArrayParams::new(start, end, increment) {
            Ok(array) => self.submit(template, Some(array)),
            Err(error) => Box::pin(async move { Err(error) }),
        }
    }

    fn get_job_program_status(&self, job_ids: &[JobId]) -> SessionFuture<JobStatusMap> {
        let state = self.state.clone();
        let job_ids = job_ids.to_vec();
        Box::pin(async move {
            let mut state = state.get_mut();
            state.status_queries += 1;
            if state.fail_status {
                return Err(GridgateError::GenericError("qstat failed".to_string()));
            }
            Ok(job_ids
                .into_iter()
                .filter_map(|id| {
                    let status = state.statuses.get(&id)?.clone();
                    Some((id, Ok(status)))
                })
                .collect())
        })
    }

    fn control(&self, job_id: &str, action: ControlAction) -> SessionFuture<()> {
        let state = self.state.clone();
        let job_id = job_id.to_string();
        Box::pin(async move {
            let mut state = state.get_mut();
            state.controlled.push((job_id.clone(), action));
            if state.fail_control {
                return Err(GridgateError::GenericError("qdel failed".to_string()));
            }
            if action == ControlAction::Terminate {
                state.statuses.remove(&job_id);
            }
            Ok(())
        })
    }

    fn job_detail(&self, job_id: &str) -> SessionFuture<JobDetail> {
        let state = self.state.clone();
        let job_id = job_id.to_string();
        Box::pin(async move {
            let state = state.get();
            let mut detail = JobDetail::default();
            detail
                .fields
                .insert("job_number".to_string(), DetailValue::Single(job_id.clone()));
            if let Some(reasons) = state.error_reasons.get(&job_id) {
                detail.fields.insert(
                    ERROR_REASON_KEY.to_string(),
                    DetailValue::List(reasons.clone()),
                );
            }
            Ok(detail)
        })
    }

    fn accounting(&self, job_id: &str) -> SessionFuture<Option<Vec<AccountingRecord>>> {
        let state = self.state.clone();
        let job_id = job_id.to_string();
        Box::pin(async move { Ok(state.get().accounting.get(&job_id).cloned()) })
    }

    fn jobs(&self) -> Vec<Job> {
        self.jobs.get().clone()
    }

    fn release_job(&self, job_id: &str) {
        self.jobs.get_mut().retain(|job| job.job_id != job_id);
    }

    fn close(&self) {
        self.jobs.get_mut().clear();
    }
}

/// Backend whose sessions all share one [`MockSessionState`].
#[derive(Default)]
pub struct MockBackend {
    pub state: WrappedRcRefCell<MockSessionState>,
    pub fail: bool,
}

impl MockBackend {
    pub fn new(state: WrappedRcRefCell<MockSessionState>) -> Self {
        Self { state, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

impl SessionBackend for MockBackend {
    fn backend_info(&self) -> SessionFuture<BackendInfo> {
        let fail = self.fail;
        Box::pin(async move {
            if fail {
                return Err(GridgateError::BackendUnavailable(
                    "qstat: command not found".to_string(),
                ));
            }
            Ok(BackendInfo {
                name: "SGE".to_string(),
                version: "8.1.9".to_string(),
            })
        })
    }

    fn open_session(&self, name: &str) -> Rc<dyn Session> {
        Rc::new(MockSession {
            name: name.to_string(),
            state: self.state.clone(),
            jobs: Default::default(),
        })
    }
}

/// Session manager that is already ready and creates mocked sessions.
pub fn mock_sessions(state: WrappedRcRefCell<MockSessionState>) -> SessionManagerRef {
    let mut manager = SessionManager::new(Rc::new(MockBackend::new(state)));
    manager.resolve(Readiness::Ready(BackendInfo {
        name: "SGE".to_string(),
        version: "8.1.9".to_string(),
    }));
    SessionManagerRef::new(manager)
}

#[derive(Default)]
pub struct MemoryAuditSink {
    records: WrappedRcRefCell<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.get().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn insert(&self, record: AuditRecord) {
        self.records.get_mut().push(record);
    }
}
