use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::error::{GridgateError, validation_error};

/// Description of a job to be submitted into the grid engine.
///
/// A template is built once from a job-spec file and is never mutated after submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTemplate {
    pub remote_command: String,
    pub args: Vec<String>,
    pub submit_as_hold: bool,
    pub job_environment: BTreeMap<String, String>,
    pub working_directory: Option<String>,
    pub job_category: Option<String>,
    /// Additional raw `qsub` flags, already split into tokens.
    pub native_specification: Vec<String>,
    pub email: Vec<String>,
    pub block_email: bool,
    pub start_time: Option<String>,
    pub job_name: Option<String>,
    pub input_path: Option<String>,
    pub output_path: Option<String>,
    pub error_path: Option<String>,
    pub join_files: bool,
}

impl JobTemplate {
    pub fn new(remote_command: impl Into<String>) -> Self {
        Self {
            remote_command: remote_command.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.remote_command.trim().is_empty() {
            return validation_error("Job template has an empty remote command");
        }
        Ok(())
    }

    /// Name under which the job is tracked; falls back to the file name of the remote command.
    pub fn display_name(&self) -> String {
        self.job_name.clone().unwrap_or_else(|| {
            Path::new(&self.remote_command)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.remote_command.clone())
        })
    }
}

/// Task range of an array job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayParams {
    pub start: u32,
    pub end: u32,
    pub increment: u32,
}

impl ArrayParams {
    /// Bounds are accepted only if `start > 0`, `end >= start` and `start <= increment <= end`.
    pub fn new(start: u32, end: u32, increment: u32) -> crate::Result<Self> {
        if start == 0 || end < start || increment < start || increment > end {
            return validation_error(format!(
                "Invalid array job bounds start={start}, end={end}, increment={increment}"
            ));
        }
        Ok(Self {
            start,
            end,
            increment,
        })
    }

    pub fn task_count(&self) -> u64 {
        u64::from((self.end - self.start) / self.increment) + 1
    }

    pub fn task_ids(&self) -> std::iter::StepBy<std::ops::RangeInclusive<u32>> {
        (self.start..=self.end).step_by(self.increment as usize)
    }

    pub fn to_qsub_range(&self) -> String {
        format!("{}-{}:{}", self.start, self.end, self.increment)
    }
}

/// Contents of a job-spec JSON file as sent by the request layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobSpec {
    pub remote_command: Option<String>,
    pub args: Vec<String>,
    pub submit_as_hold: bool,
    pub job_environment: BTreeMap<String, String>,
    pub working_directory: Option<String>,
    pub job_category: Option<String>,
    pub native_specification: Option<String>,
    pub email: Vec<String>,
    pub block_email: bool,
    pub start_time: Option<String>,
    pub job_name: Option<String>,
    pub input_path: Option<String>,
    pub output_path: Option<String>,
    pub error_path: Option<String>,
    pub join_files: bool,
    pub start: Option<Value>,
    pub end: Option<Value>,
    pub incr: Option<Value>,
}

fn as_task_index(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

impl JobSpec {
    pub fn parse(data: &str) -> crate::Result<JobSpec> {
        serde_json::from_str(data)
            .map_err(|e| GridgateError::ValidationError(format!("Invalid job spec: {e}")))
    }

    pub async fn load(path: &Path) -> crate::Result<JobSpec> {
        let data = tokio::fs::read_to_string(path).await.map_err(|e| {
            GridgateError::ValidationError(format!(
                "Cannot read job spec {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&data)
    }

    /// Returns the array bounds if the spec describes a valid array job, `None` for a single job.
    pub fn array_params(&self) -> Option<ArrayParams> {
        let start = as_task_index(self.start.as_ref())?;
        let end = as_task_index(self.end.as_ref())?;
        let increment = as_task_index(self.incr.as_ref())?;
        ArrayParams::new(start, end, increment).ok()
    }

    pub fn to_template(&self) -> crate::Result<JobTemplate> {
        let template = JobTemplate {
            remote_command: self.remote_command.clone().unwrap_or_default(),
            args: self.args.clone(),
            submit_as_hold: self.submit_as_hold,
            job_environment: self.job_environment.clone(),
            working_directory: self.working_directory.clone(),
            job_category: self.job_category.clone(),
            native_specification: self
                .native_specification
                .as_deref()
                .map(|spec| spec.split_whitespace().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
            email: self.email.clone(),
            block_email: self.block_email,
            start_time: self.start_time.clone(),
            job_name: self.job_name.clone(),
            input_path: self.input_path.clone(),
            output_path: self.output_path.clone(),
            error_path: self.error_path.clone(),
            join_files: self.join_files,
        };
        template.validate()?;
        Ok(template)
    }
}
