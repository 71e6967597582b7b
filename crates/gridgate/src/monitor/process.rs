use chrono::{DateTime, Utc};

use crate::common::time::format_hms_duration;
use crate::gridengine::parse::AccountingRecord;
use crate::gridengine::{ControlAction, JobProgramStatus, JobStatus};
use crate::monitor::{JobDescriptor, JobMonitorRef, JobTimeLimits, derive_job_status};
use crate::session::{Session, SessionManagerRef};

/// Performs one monitoring tick over all tracked jobs.
///
/// Statuses are queried once per owning session. Failures are isolated per job: the job stays
/// tracked and is retried on the next tick.
pub async fn poll_tracked_jobs(
    monitor: &JobMonitorRef,
    sessions: &SessionManagerRef,
    limits: &JobTimeLimits,
    now: DateTime<Utc>,
) {
    let groups = {
        let monitor = monitor.get();
        if monitor.is_empty() {
            return;
        }
        monitor.jobs_by_session()
    };

    for (session_name, job_ids) in groups {
        let session = sessions.get().get_session(&session_name);
        let session = match session {
            Ok(session) => session,
            Err(error) => {
                log::error!(
                    "Cannot poll {} job(s) of session {session_name}: {error}",
                    job_ids.len()
                );
                continue;
            }
        };

        let mut statuses = match session.get_job_program_status(&job_ids).await {
            Ok(statuses) => statuses,
            Err(error) => {
                for job_id in &job_ids {
                    log::error!("Cannot query status of job {job_id}: {error}");
                }
                continue;
            }
        };

        for job_id in job_ids {
            match statuses.remove(&job_id) {
                None => complete_job(monitor, session.as_ref(), &job_id, now).await,
                Some(Ok(status)) => {
                    update_job(monitor, session.as_ref(), limits, &job_id, status, now).await
                }
                Some(Err(error)) => log::error!("Cannot read status of job {job_id}: {error}"),
            }
        }
    }
}

fn finish_job(
    monitor: &JobMonitorRef,
    session: &dyn Session,
    job_id: &str,
    status: JobStatus,
    now: DateTime<Utc>,
) {
    if monitor.get_mut().finish(job_id, status, now).is_some() {
        session.release_job(job_id);
    }
}

fn apply_accounting(job: &mut JobDescriptor, records: &[AccountingRecord]) {
    let codes: Vec<i32> = records.iter().filter_map(|r| r.exit_status()).collect();
    job.exit_status = codes
        .iter()
        .copied()
        .find(|code| *code != 0)
        .or(codes.first().copied());

    let times: Vec<_> = records.iter().filter_map(|r| r.execution_time()).collect();
    if !times.is_empty() {
        job.total_execution_time = Some(times.into_iter().sum());
    }
}

/// The job has left the grid engine.
async fn complete_job(
    monitor: &JobMonitorRef,
    session: &dyn Session,
    job_id: &str,
    now: DateTime<Utc>,
) {
    let accounting = match session.accounting(job_id).await {
        Ok(records) => records,
        Err(error) => {
            log::warn!("Cannot read accounting of job {job_id}: {error}");
            None
        }
    };
    if let Some(records) = accounting {
        if let Some(job) = monitor.get_mut().get_tracked_mut(job_id) {
            apply_accounting(job, &records);
        }
    }
    finish_job(monitor, session, job_id, JobStatus::Completed, now);
}

async fn log_error_reasons(session: &dyn Session, job_id: &str) {
    match session.job_detail(job_id).await {
        Ok(detail) if !detail.error_reasons().is_empty() => {
            for reason in detail.error_reasons() {
                log::error!("Job {job_id} failed: {reason}");
            }
        }
        Ok(_) => log::error!("Job {job_id} is in error state"),
        Err(error) => log::warn!("Job {job_id} is in error state, cannot read details: {error}"),
    }
}

async fn update_job(
    monitor: &JobMonitorRef,
    session: &dyn Session,
    limits: &JobTimeLimits,
    job_id: &str,
    program_status: JobProgramStatus,
    now: DateTime<Utc>,
) {
    let (status, overdue) = {
        let mut monitor = monitor.get_mut();
        let Some(job) = monitor.get_tracked_mut(job_id) else {
            return;
        };
        if job.is_array() {
            job.update_tasks(&program_status.tasks, now);
        }
        let status = derive_job_status(&program_status);
        job.set_status(status, now);

        let elapsed = job.time_in_status(now);
        let overdue = limits
            .budget(job.job_type, status)
            .filter(|budget| elapsed > *budget)
            .map(|budget| (budget, elapsed));
        (status, overdue)
    };

    if status == JobStatus::Error {
        log_error_reasons(session, job_id).await;
        finish_job(monitor, session, job_id, JobStatus::Error, now);
        return;
    }

    let Some((budget, elapsed)) = overdue else {
        return;
    };
    log::info!(
        "Job {job_id} has been {status} for {}, exceeding the limit of {}; terminating it",
        format_hms_duration(&elapsed),
        humantime::format_duration(budget)
    );
    match session.control(job_id, ControlAction::Terminate).await {
        Ok(()) => {
            if status == JobStatus::Running {
                if let Some(job) = monitor.get_mut().get_tracked_mut(job_id) {
                    job.total_execution_time = Some(elapsed);
                }
            }
            finish_job(monitor, session, job_id, JobStatus::Terminated, now);
        }
        Err(error) => log::error!("Cannot terminate job {job_id}: {error}"),
    }
}
