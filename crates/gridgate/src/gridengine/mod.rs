//! Adapter for the Grid Engine command line tools.
//!
//! The grid engine is only reachable through its CLI (`qsub`, `qstat`, `qacct`, `qdel`, ...).
//! This module turns job templates into command invocations and parses the textual replies.
//! Parsing lives in [`parse`], [`status`] and [`submit`] and never spawns processes, while
//! [`GridEngine`] is the thin layer that actually executes the commands.
pub mod command;
pub mod parse;
pub mod status;
pub mod submit;
pub mod template;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::JobId;
use crate::config::Config;
use crate::gridengine::command::{CommandOutput, run_command, run_command_unchecked};
use crate::gridengine::parse::{
    AccountingRecord, BackendInfo, JobDetail, StatusTable, parse_accounting, parse_job_detail,
    parse_status_table, parse_submit_output, parse_version_banner,
};
use crate::gridengine::submit::build_submit_args;
use crate::gridengine::template::{ArrayParams, JobTemplate};

pub use parse::JobProgramStatus;
pub use status::JobStatus;

#[derive(Debug, Error)]
pub enum GridEngineError {
    #[error("Cannot start `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("`{program}` failed with exit code {code}\nStderr: {stderr}\nStdout: {stdout}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
        stdout: String,
    },
    #[error("Cannot parse `{program}` output: {message}")]
    Parse { program: String, message: String },
}

impl GridEngineError {
    /// `qacct` reports a finished job as unknown until its accounting record is written.
    pub fn is_job_not_found(&self) -> bool {
        match self {
            GridEngineError::CommandFailed { stderr, stdout, .. } => [stderr, stdout]
                .iter()
                .any(|text| text.contains("job id") && text.contains("not found")),
            _ => false,
        }
    }
}

/// Control operations that can be applied to a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlAction {
    Terminate,
    Suspend,
    Resume,
    Hold,
    Release,
}

/// Names (or paths) of the Grid Engine executables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridEngineCommands {
    pub qsub: String,
    pub qstat: String,
    pub qacct: String,
    pub qdel: String,
    pub qmod: String,
    pub qhold: String,
    pub qrls: String,
}

impl Default for GridEngineCommands {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl GridEngineCommands {
    pub fn from_config(config: &Config) -> Self {
        Self {
            qsub: config.qsub_command.clone(),
            qstat: config.qstat_command.clone(),
            qacct: config.qacct_command.clone(),
            qdel: config.qdel_command.clone(),
            qmod: config.qmod_command.clone(),
            qhold: config.qhold_command.clone(),
            qrls: config.qrls_command.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GridEngine {
    commands: GridEngineCommands,
}

impl GridEngine {
    pub fn new(commands: GridEngineCommands) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &GridEngineCommands {
        &self.commands
    }

    /// Runs `qsub` with already built arguments.
    ///
    /// The job working directory is only passed as `-wd`, it may not exist on this host.
    pub async fn submit(&self, args: &[String]) -> Result<CommandOutput, GridEngineError> {
        run_command(&self.commands.qsub, args).await
    }

    /// Validates the template, submits it and returns the id assigned by the grid engine.
    ///
    /// Validation happens before any process is spawned.
    pub async fn submit_job(
        &self,
        template: &JobTemplate,
        array: Option<&ArrayParams>,
    ) -> crate::Result<JobId> {
        let args = build_submit_args(template, array)?;
        let output = self.submit(&args).await?;
        Ok(parse_submit_output(&output.stdout)?)
    }

    /// Status table of all jobs currently known to the grid engine.
    pub async fn query_status(&self) -> Result<StatusTable, GridEngineError> {
        let output = run_command(&self.commands.qstat, &[]).await?;
        parse_status_table(&output.stdout)
    }

    /// Detailed description of a single job (`qstat -j`).
    pub async fn query_job_detail(&self, job_id: &str) -> Result<JobDetail, GridEngineError> {
        let args = vec!["-j".to_string(), job_id.to_string()];
        let output = run_command(&self.commands.qstat, &args).await?;
        parse_job_detail(&output.stdout)
    }

    /// Accounting records of a finished job.
    ///
    /// Returns `None` while the grid engine has not written the record yet.
    pub async fn query_accounting(
        &self,
        job_id: &str,
    ) -> Result<Option<Vec<AccountingRecord>>, GridEngineError> {
        let args = vec!["-j".to_string(), job_id.to_string()];
        match run_command(&self.commands.qacct, &args).await {
            Ok(output) => parse_accounting(&output.stdout).map(Some),
            Err(error) if error.is_job_not_found() => {
                log::debug!("Accounting record of job {job_id} is not available yet");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Name and version of the grid engine, read from the `qstat -help` banner.
    pub async fn backend_info(&self) -> Result<BackendInfo, GridEngineError> {
        // Some versions exit with a non-zero code after printing the help
        let output =
            run_command_unchecked(&self.commands.qstat, &["-help".to_string()]).await?;
        parse_version_banner(&output.stdout)
    }

    pub async fn control(
        &self,
        job_id: &str,
        action: ControlAction,
    ) -> Result<(), GridEngineError> {
        let (program, mut args) = match action {
            ControlAction::Terminate => (&self.commands.qdel, vec![]),
            ControlAction::Suspend => (&self.commands.qmod, vec!["-sj".to_string()]),
            ControlAction::Resume => (&self.commands.qmod, vec!["-usj".to_string()]),
            ControlAction::Hold => (&self.commands.qhold, vec![]),
            ControlAction::Release => (&self.commands.qrls, vec![]),
        };
        args.push(job_id.to_string());
        run_command(program, &args).await?;
        Ok(())
    }
}
