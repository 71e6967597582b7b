//! The broker ties all components together.
//!
//! A single [`Broker`] context is created at startup. External callers talk to it through a
//! [`BrokerService`], whose requests are serialized through one queue and processed on the local
//! task set. Periodic work (job polling, list refresh) is driven by an owned [`Scheduler`].
mod rpc;
mod scheduler;

use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::JobId;
use crate::admission::AdmissionController;
use crate::admission::audit::AuditSink;
use crate::admission::lists::{ListStore, ListStoreRef};
use crate::common::error::GridgateError;
use crate::config::ConfigRef;
use crate::gridengine::ControlAction;
use crate::gridengine::JobStatus;
use crate::monitor::{JobMonitor, JobMonitorRef, JobTimeLimits, poll_tracked_jobs};
use crate::session::{SessionBackend, SessionManager, SessionManagerRef};

pub use rpc::{BrokerRequest, BrokerService, create_broker_service, run_broker};
pub use scheduler::Scheduler;

#[derive(Clone)]
pub struct Broker {
    pub config: ConfigRef,
    pub sessions: SessionManagerRef,
    pub monitor: JobMonitorRef,
    pub lists: ListStoreRef,
    pub admission: AdmissionController,
}

impl Broker {
    pub fn new(
        config: ConfigRef,
        backend: Rc<dyn SessionBackend>,
        audit: Rc<dyn AuditSink>,
    ) -> Self {
        let sessions = SessionManagerRef::new(SessionManager::new(backend));
        let monitor = JobMonitorRef::new(JobMonitor::default());
        let lists = ListStoreRef::new(ListStore::default());
        let admission = AdmissionController::new(
            config.clone(),
            lists.clone(),
            monitor.clone(),
            sessions.clone(),
            audit,
        );
        Self {
            config,
            sessions,
            monitor,
            lists,
            admission,
        }
    }

    /// Re-reads the blacklist and whitelist files named by the current configuration.
    pub async fn refresh_lists(&self) {
        let config = self.config.snapshot();
        self.lists
            .refresh(
                config.local_list_path.as_deref(),
                config.global_list_path.as_deref(),
            )
            .await;
    }

    /// One monitoring tick with the time limits of the current configuration.
    pub async fn poll_jobs(&self, now: DateTime<Utc>) {
        let limits = JobTimeLimits::from_config(self.config.get().config());
        poll_tracked_jobs(&self.monitor, &self.sessions, &limits, now).await;
    }

    /// Applies a control action to a tracked job. A terminated job stops being tracked.
    pub async fn control_job(&self, job_id: &JobId, action: ControlAction) -> crate::Result<()> {
        let session_name = self
            .monitor
            .get()
            .get_tracked(job_id)
            .map(|job| job.session_name.clone())
            .ok_or_else(|| GridgateError::GenericError(format!("Job {job_id} is not tracked")))?;
        let session = self.sessions.get().get_session(&session_name)?;
        session.control(job_id, action).await?;
        log::info!("Job {job_id}: {action:?} applied");

        if action == ControlAction::Terminate
            && self
                .monitor
                .get_mut()
                .finish(job_id, JobStatus::Terminated, Utc::now())
                .is_some()
        {
            session.release_job(job_id);
        }
        Ok(())
    }
}
