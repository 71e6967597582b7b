use std::rc::Rc;

use chrono::Utc;

use crate::gridengine::parse::{AccountingRecord, BackendInfo, JobDetail};
use crate::gridengine::template::{ArrayParams, JobTemplate};
use crate::gridengine::{ControlAction, GridEngine};
use crate::session::{Job, JobStatusMap, JobType, Session, SessionBackend, SessionFuture};
use crate::{JobId, Map, WrappedRcRefCell};

/// Backend that talks to the grid engine through its command line tools.
pub struct CliBackend {
    engine: GridEngine,
}

impl CliBackend {
    pub fn new(engine: GridEngine) -> Self {
        Self { engine }
    }
}

impl SessionBackend for CliBackend {
    fn backend_info(&self) -> SessionFuture<BackendInfo> {
        let engine = self.engine.clone();
        Box::pin(async move { Ok(engine.backend_info().await?) })
    }

    fn open_session(&self, name: &str) -> Rc<dyn Session> {
        Rc::new(CliSession::new(name.to_string(), self.engine.clone()))
    }
}

pub struct CliSession {
    name: String,
    engine: GridEngine,
    jobs: WrappedRcRefCell<Vec<Job>>,
}

impl CliSession {
    pub fn new(name: String, engine: GridEngine) -> Self {
        Self {
            name,
            engine,
            jobs: Default::default(),
        }
    }

    fn submit(&self, template: &JobTemplate, array: Option<ArrayParams>) -> SessionFuture<JobId> {
        let engine = self.engine.clone();
        let jobs = self.jobs.clone();
        let template = template.clone();

        Box::pin(async move {
            template.validate()?;
            let job_id = engine.submit_job(&template, array.as_ref()).await?;
            log::debug!("Job {job_id} submitted into the grid engine");
            jobs.get_mut().push(Job {
                job_id: job_id.clone(),
                job_type: if array.is_some() {
                    JobType::Array
                } else {
                    JobType::Single
                },
                template,
                array,
                submitted_at: Utc::now(),
            });
            Ok(job_id)
        })
    }
}

impl Session for CliSession {
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
        let engine = self.engine.clone();
        let job_ids = job_ids.to_vec();

        Box::pin(async move {
            let table = engine.query_status().await?;
            let mut result = Map::with_capacity(job_ids.len());
            for job_id in job_ids {
                if let Some(job) = table.get(&job_id) {
                    result.insert(job_id, job.program_status().map_err(|e| e.into()));
                }
            }
            Ok(result)
        })
    }

    fn control(&self, job_id: &str, action: ControlAction) -> SessionFuture<()> {
        let engine = self.engine.clone();
        let job_id = job_id.to_string();
        Box::pin(async move { Ok(engine.control(&job_id, action).await?) })
    }

    fn job_detail(&self, job_id: &str) -> SessionFuture<JobDetail> {
        let engine = self.engine.clone();
        let job_id = job_id.to_string();
        Box::pin(async move { Ok(engine.query_job_detail(&job_id).await?) })
    }

    fn accounting(&self, job_id: &str) -> SessionFuture<Option<Vec<AccountingRecord>>> {
        let engine = self.engine.clone();
        let job_id = job_id.to_string();
        Box::pin(async move { Ok(engine.query_accounting(&job_id).await?) })
    }

    fn jobs(&self) -> Vec<Job> {
        self.jobs.get().clone()
    }

    fn release_job(&self, job_id: &str) {
        self.jobs.get_mut().retain(|job| job.job_id != job_id);
    }

    fn close(&self) {
        let mut jobs = self.jobs.get_mut();
        if !jobs.is_empty() {
            log::debug!(
                "Closing session {} with {} job handle(s)",
                self.name,
                jobs.len()
            );
        }
        jobs.clear();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use super::CliSession;
    use crate::common::error::GridgateError;
    use crate::gridengine::template::JobTemplate;
    use crate::gridengine::{ControlAction, GridEngine, GridEngineCommands, JobStatus};
    use crate::session::{JobType, Session};
    use crate::tests::utils::write_script;

    fn session(dir: &Path) -> CliSession {
        let commands = GridEngineCommands {
            qsub: dir.join("qsub").display().to_string(),
            qstat: dir.join("qstat").display().to_string(),
            qacct: dir.join("qacct").display().to_string(),
            qdel: dir.join("qdel").display().to_string(),
            qmod: dir.join("qmod").display().to_string(),
            qhold: dir.join("qhold").display().to_string(),
            qrls: dir.join("qrls").display().to_string(),
        };
        CliSession::new("test".to_string(), GridEngine::new(commands))
    }

    #[tokio::test]
    async fn run_job_records_handle() {
        let dir = TempDir::with_prefix("gridgate").unwrap();
        write_script(
            dir.path(),
            "qsub",
            "echo 'Your job 77 (\"sleep\") has been submitted'",
        );
        let session = session(dir.path());

        let job_id = session.run_job(&JobTemplate::new("sleep.sh")).await.unwrap();
        assert_eq!(job_id, "77");
        let jobs = session.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_type, JobType::Single);

        session.release_job("77");
        assert!(session.jobs().is_empty());
    }

    #[tokio::test]
    async fn run_bulk_jobs_passes_range() {
        let dir = TempDir::with_prefix("gridgate").unwrap();
        let args_file = dir.path().join("args");
        write_script(
            dir.path(),
            "qsub",
            &format!(
                "echo \"$@\" > {}\necho 'Your job-array 78.1-4:1 (\"a\") has been submitted'",
                args_file.display()
            ),
        );
        let session = session(dir.path());

        let job_id = session
            .run_bulk_jobs(&JobTemplate::new("a.sh"), 1, 4, 1)
            .await
            .unwrap();
        assert_eq!(job_id, "78");
        assert_eq!(
            std::fs::read_to_string(&args_file).unwrap().trim(),
            "-t 1-4:1 a.sh"
        );
        assert_eq!(session.jobs()[0].job_type, JobType::Array);
    }

    #[tokio::test]
    async fn working_directory_is_only_passed_to_qsub() {
        let dir = TempDir::with_prefix("gridgate").unwrap();
        let args_file = dir.path().join("args");
        write_script(
            dir.path(),
            "qsub",
            &format!(
                "echo \"$@\" > {}\necho 'Your job 5 (\"a\") has been submitted'",
                args_file.display()
            ),
        );
        let session = session(dir.path());

        let mut template = JobTemplate::new("a.sh");
        template.working_directory = Some("/cluster/scratch/alice".to_string());
        let job_id = session.run_job(&template).await.unwrap();
        assert_eq!(job_id, "5");
        assert_eq!(
            std::fs::read_to_string(&args_file).unwrap().trim(),
            "-wd /cluster/scratch/alice a.sh"
        );
    }

    #[tokio::test]
    async fn invalid_bulk_bounds_are_rejected() {
        let dir = TempDir::with_prefix("gridgate").unwrap();
        let session = session(dir.path());
        let result = session
            .run_bulk_jobs(&JobTemplate::new("a.sh"), 3, 2, 1)
            .await;
        assert!(matches!(result, Err(GridgateError::ValidationError(_))));
    }

    #[tokio::test]
    async fn reserved_flag_fails_before_spawning() {
        let dir = TempDir::with_prefix("gridgate").unwrap();
        let marker = dir.path().join("spawned");
        write_script(
            dir.path(),
            "qsub",
            &format!("touch {}\necho 'Your job 1 (\"x\") has been submitted'", marker.display()),
        );
        let session = session(dir.path());

        let mut template = JobTemplate::new("run.sh");
        template.native_specification = vec!["-sync".to_string(), "y".to_string()];
        let result = session.run_job(&template).await;
        assert!(matches!(result, Err(GridgateError::ValidationError(_))));
        assert!(!marker.exists());
        assert!(session.jobs().is_empty());
    }

    #[tokio::test]
    async fn failed_submission_is_grid_engine_error() {
        let dir = TempDir::with_prefix("gridgate").unwrap();
        write_script(dir.path(), "qsub", "echo 'Unable to run job' >&2\nexit 1");
        let session = session(dir.path());
        let result = session.run_job(&JobTemplate::new("run.sh")).await;
        assert!(matches!(result, Err(GridgateError::GridEngine(_))));
    }

    #[tokio::test]
    async fn status_of_known_jobs() {
        let dir = TempDir::with_prefix("gridgate").unwrap();
        write_script(
            dir.path(),
            "qstat",
            "cat <<'EOF'
job-ID  prior   name  user  state submit/start at     queue         slots ja-task-ID
------------------------------------------------------------------------------------
     10 0.55500 sleep alice r     01/02/2020 10:00:00 all.q@node01  1
     11 0.55500 sleep alice qw    01/02/2020 10:00:01               1
EOF",
        );
        let session = session(dir.path());
        let statuses = session
            .get_job_program_status(&["10".to_string(), "12".to_string()])
            .await
            .unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(
            statuses["10"].as_ref().unwrap().status,
            JobStatus::Running
        );
    }

    #[tokio::test]
    async fn accounting_not_found_is_swallowed() {
        let dir = TempDir::with_prefix("gridgate").unwrap();
        write_script(dir.path(), "qacct", "echo 'error: job id 5 not found' >&2\nexit 1");
        let session = session(dir.path());
        assert!(session.accounting("5").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn accounting_other_errors_surface() {
        let dir = TempDir::with_prefix("gridgate").unwrap();
        write_script(dir.path(), "qacct", "echo 'error: permission denied' >&2\nexit 1");
        let session = session(dir.path());
        assert!(session.accounting("5").await.is_err());
    }

    #[tokio::test]
    async fn terminate_runs_qdel() {
        let dir = TempDir::with_prefix("gridgate").unwrap();
        let args_file = dir.path().join("args");
        write_script(
            dir.path(),
            "qdel",
            &format!("echo \"$@\" > {}", args_file.display()),
        );
        let session = session(dir.path());
        session.control("10", ControlAction::Terminate).await.unwrap();
        assert_eq!(std::fs::read_to_string(&args_file).unwrap().trim(), "10");
    }
}
