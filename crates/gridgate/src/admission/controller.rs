use std::rc::Rc;

use chrono::Utc;

use crate::WrappedRcRefCell;
use crate::admission::audit::{AuditRecord, AuditSink};
use crate::admission::lists::ListStoreRef;
use crate::admission::window::RequestWindows;
use crate::admission::{DenialReason, RequestError, SubmitRequest, normalize_identity};
use crate::common::time::EpochMillis;
use crate::config::{Config, ConfigRef};
use crate::gridengine::template::JobSpec;
use crate::monitor::{JobDescriptor, JobMonitorRef};
use crate::session::SessionManagerRef;

#[derive(Clone)]
pub struct AdmissionController {
    config: ConfigRef,
    lists: ListStoreRef,
    windows: WrappedRcRefCell<RequestWindows>,
    monitor: JobMonitorRef,
    sessions: SessionManagerRef,
    audit: Rc<dyn AuditSink>,
}

impl AdmissionController {
    pub fn new(
        config: ConfigRef,
        lists: ListStoreRef,
        monitor: JobMonitorRef,
        sessions: SessionManagerRef,
        audit: Rc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            lists,
            windows: Default::default(),
            monitor,
            sessions,
            audit,
        }
    }

    pub fn windows(&self) -> &WrappedRcRefCell<RequestWindows> {
        &self.windows
    }

    /// Decides whether a request may proceed. Only prunes the windows, never records into them.
    fn decide(
        &self,
        identity: &str,
        time: EpochMillis,
        config: &Config,
    ) -> Result<(), DenialReason> {
        let lists = self.lists.get();
        let lists = lists.lists();
        if lists.is_blacklisted(identity) {
            return Err(DenialReason::Blacklisted);
        }
        if lists.is_whitelisted(identity) {
            log::debug!("Request of {identity} is whitelisted");
        } else {
            let mut windows = self.windows.get_mut();
            if windows.global_load(time, config.request_lifespan)
                >= config.max_requests_per_sec_global
            {
                return Err(DenialReason::GlobalCapacity);
            }
            match windows.user_load(identity, time, config.request_lifespan) {
                Some(load) if load >= config.max_requests_per_sec_user => {
                    return Err(DenialReason::UserCapacity);
                }
                _ => {}
            }
        }

        if self.monitor.get().active_count() >= config.max_concurrent_jobs {
            return Err(DenialReason::ConcurrentJobCapacity);
        }
        Ok(())
    }

    /// Admits the request and, if accepted, submits its job and starts tracking it.
    pub async fn handle_request(
        &self,
        request: SubmitRequest,
    ) -> Result<JobDescriptor, RequestError> {
        let identity = normalize_identity(&request.ip);
        self.config.reload_if_due(request.time).await;
        let config = self.config.snapshot();

        if let Err(reason) = self.decide(&identity, request.time, &config) {
            log::debug!("Request of {identity} at {} denied: {reason}", request.time);
            return Err(RequestError::Denied(reason));
        }
        {
            let mut windows = self.windows.get_mut();
            windows.evict_inactive(request.time, config.user_lifespan);
            windows.record(&identity, request.time);
        }
        self.audit.insert(AuditRecord {
            ip: identity.clone(),
            time: request.time,
        });

        self.monitor.get_mut().begin_submission();
        let result = self.submit(&identity, &request, &config).await;
        self.monitor.get_mut().end_submission();

        let descriptor = result.inspect_err(|error| {
            log::warn!("Submission requested by {identity} failed: {error}");
        })?;
        self.monitor.get_mut().register(descriptor.clone());
        Ok(descriptor)
    }

    async fn submit(
        &self,
        identity: &str,
        request: &SubmitRequest,
        config: &Config,
    ) -> crate::Result<JobDescriptor> {
        let spec = JobSpec::load(&request.job_path).await?;
        let template = spec.to_template()?;
        let array = spec.array_params();

        let session = self
            .sessions
            .get_mut()
            .get_or_create_session(&config.session_name)?;
        let job_id = match &array {
            Some(array) => {
                session
                    .run_bulk_jobs(&template, array.start, array.end, array.increment)
                    .await?
            }
            None => session.run_job(&template).await?,
        };
        log::info!(
            "Job {job_id} ({}) submitted for {identity}",
            template.display_name()
        );

        Ok(JobDescriptor::new(
            job_id,
            template.display_name(),
            array.as_ref(),
            identity.to_string(),
            session.name().to_string(),
            Utc::now(),
        ))
    }
}
