//! Parsers for the textual output of Grid Engine commands.
//!
//! Nothing in this module spawns processes, every function works on captured output.
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::common::time::parse_accounting_datetime;
use crate::gridengine::GridEngineError;
use crate::gridengine::status::{
    JobStatus, aggregate_array_status, expand_task_range, map_raw_state,
};
use crate::{JobId, Map};

static SUBMIT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Your job(?:-array)? (\d+)(?:\.\S+)? \(").expect("valid submit regex")
});
static TERSE_SUBMIT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?:\.\S+)?$").expect("valid terse regex"));
static NUMBERED_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*\S)\s+(\d+)$").expect("valid numbered key regex"));

/// Key of the `qstat -j` detail whose numbered occurrences are collected into one list.
pub const ERROR_REASON_KEY: &str = "error reason";

fn parse_error(program: &str, message: String) -> GridEngineError {
    GridEngineError::Parse {
        program: program.to_string(),
        message,
    }
}

/// One row of the `qstat` job table describing a task (or a range of pending tasks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QstatTaskRow {
    pub task_spec: String,
    pub state: String,
    pub queue: Option<String>,
}

/// A job from the `qstat` job table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QstatJob {
    pub job_id: JobId,
    pub priority: String,
    pub job_name: String,
    pub user: String,
    pub job_state: String,
    pub submit_date: String,
    pub queue: Option<String>,
    pub slots: Option<u32>,
    pub tasks: Vec<QstatTaskRow>,
}

pub type StatusTable = Map<JobId, QstatJob>;

/// Current status of a job as seen by the grid engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgramStatus {
    pub status: JobStatus,
    /// Per-task statuses of an array job, ordered by task id. Empty for single jobs.
    pub tasks: Vec<(u32, JobStatus)>,
}

impl QstatJob {
    pub fn is_array(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn program_status(&self) -> Result<JobProgramStatus, GridEngineError> {
        if !self.is_array() {
            return Ok(JobProgramStatus {
                status: map_raw_state(&self.job_state),
                tasks: vec![],
            });
        }
        let mut tasks = Vec::new();
        for row in &self.tasks {
            let status = map_raw_state(&row.state);
            tasks.extend(
                expand_task_range(&row.task_spec)?
                    .into_iter()
                    .map(|id| (id, status)),
            );
        }
        tasks.sort_by_key(|(id, _)| *id);
        Ok(JobProgramStatus {
            status: aggregate_array_status(tasks.iter().map(|(_, status)| *status)),
            tasks,
        })
    }
}

/// Parses the job table printed by a plain `qstat` invocation.
///
/// The first two lines (column names and a dashed separator) are skipped. Each remaining line
/// has the columns `job-ID prior name user state submit/start-date time [queue] slots
/// [ja-task-ID]`. An array job can occupy several lines, which are merged into one entry.
pub fn parse_status_table(output: &str) -> Result<StatusTable, GridEngineError> {
    let mut table = StatusTable::new();
    for line in output.lines().skip(2) {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            return Err(parse_error(
                "qstat",
                format!("Unexpected job table line `{}`", line.trim()),
            ));
        }
        let job_id = fields[0].to_string();
        let state = fields[4].to_string();
        let mut rest = &fields[7..];
        let queue = match rest.first() {
            Some(value) if value.parse::<u32>().is_err() => {
                rest = &rest[1..];
                Some(value.to_string())
            }
            _ => None,
        };
        let slots = rest.first().and_then(|value| value.parse::<u32>().ok());
        let task = rest.get(1).map(|spec| QstatTaskRow {
            task_spec: spec.to_string(),
            state: state.clone(),
            queue: queue.clone(),
        });

        let job = table.entry(job_id.clone()).or_insert_with(|| QstatJob {
            job_id,
            priority: fields[1].to_string(),
            job_name: fields[2].to_string(),
            user: fields[3].to_string(),
            job_state: state,
            submit_date: format!("{} {}", fields[5], fields[6]),
            queue,
            slots,
            tasks: vec![],
        });
        if let Some(task) = task {
            job.tasks.push(task);
        }
    }
    Ok(table)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DetailValue {
    Single(String),
    List(Vec<String>),
}

/// Key/value block printed by `qstat -j <job-id>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetail {
    pub fields: Map<String, DetailValue>,
}

impl JobDetail {
    pub fn get(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(DetailValue::Single(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn error_reasons(&self) -> &[String] {
        match self.fields.get(ERROR_REASON_KEY) {
            Some(DetailValue::List(reasons)) => reasons,
            _ => &[],
        }
    }

    /// Raw state code; newer versions print it per task as `job_state 1`.
    pub fn job_state(&self) -> Option<&str> {
        self.get("job_state").or_else(|| {
            self.fields.iter().find_map(|(key, value)| match value {
                DetailValue::Single(value) if key.starts_with("job_state ") => {
                    Some(value.as_str())
                }
                _ => None,
            })
        })
    }
}

/// Parses the colon delimited output of `qstat -j <job-id>`.
///
/// Indented lines continue the value of the previous key. Repeated `error reason N` keys are
/// gathered, in order, into a single list under [`ERROR_REASON_KEY`].
pub fn parse_job_detail(output: &str) -> Result<JobDetail, GridEngineError> {
    let mut detail = JobDetail::default();
    let mut last_key: Option<String> = None;

    for line in output.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with("====") {
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            if let Some(DetailValue::Single(value)) =
                last_key.as_ref().and_then(|key| detail.fields.get_mut(key))
            {
                value.push('\n');
                value.push_str(line.trim());
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(parse_error(
                "qstat -j",
                format!("Line without a key `{}`", line.trim()),
            ));
        };
        let key = key.split_whitespace().collect::<Vec<_>>().join(" ");
        let value = value.trim().to_string();

        let is_error_reason = NUMBERED_KEY_REGEX
            .captures(&key)
            .and_then(|captures| captures.get(1))
            .is_some_and(|name| name.as_str() == ERROR_REASON_KEY);
        if is_error_reason {
            match detail
                .fields
                .entry(ERROR_REASON_KEY.to_string())
                .or_insert_with(|| DetailValue::List(vec![]))
            {
                DetailValue::List(reasons) => reasons.push(value),
                DetailValue::Single(_) => {}
            }
            last_key = None;
        } else {
            detail
                .fields
                .insert(key.clone(), DetailValue::Single(value));
            last_key = Some(key);
        }
    }

    if detail.fields.is_empty() {
        return Err(parse_error("qstat -j", "Empty job detail".to_string()));
    }
    Ok(detail)
}

/// One accounting record printed by `qacct -j <job-id>`. Array jobs produce one per task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingRecord {
    pub fields: Map<String, String>,
}

impl AccountingRecord {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|value| value.as_str())
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.get("exit_status")
            .and_then(|value| value.split_whitespace().next())
            .and_then(|value| value.parse().ok())
    }

    pub fn failed(&self) -> bool {
        self.get("failed")
            .and_then(|value| value.split_whitespace().next())
            .is_some_and(|value| value != "0")
    }

    /// Wallclock time of the job; printed either as `60` or `60.120s` depending on version.
    pub fn wallclock(&self) -> Option<Duration> {
        self.get("ru_wallclock")
            .map(|value| value.trim_end_matches('s'))
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|seconds| *seconds >= 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Wallclock time, or the difference of `end_time` and `start_time` if it is missing.
    pub fn execution_time(&self) -> Option<Duration> {
        self.wallclock().or_else(|| {
            let start = parse_accounting_datetime(self.get("start_time")?).ok()?;
            let end = parse_accounting_datetime(self.get("end_time")?).ok()?;
            (end - start).to_std().ok()
        })
    }
}

/// Parses `qacct -j` output: blocks separated by `=====` lines, `key value` per line.
pub fn parse_accounting(output: &str) -> Result<Vec<AccountingRecord>, GridEngineError> {
    let mut records = Vec::new();
    let mut current = AccountingRecord::default();

    for line in output.lines() {
        let line = line.trim();
        if line.starts_with("====") {
            if !current.fields.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }
        if line.is_empty() {
            continue;
        }
        match line.split_once(char::is_whitespace) {
            Some((key, value)) => {
                current
                    .fields
                    .insert(key.to_string(), value.trim().to_string());
            }
            None => {
                current.fields.insert(line.to_string(), String::new());
            }
        }
    }
    if !current.fields.is_empty() {
        records.push(current);
    }
    if records.is_empty() {
        return Err(parse_error("qacct", "No accounting records".to_string()));
    }
    Ok(records)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    pub name: String,
    pub version: String,
}

/// Parses the banner printed as the first line of `qstat -help`, e.g. `SGE 8.1.9`.
pub fn parse_version_banner(output: &str) -> Result<BackendInfo, GridEngineError> {
    let line = output
        .lines()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())
        .ok_or_else(|| parse_error("qstat -help", "Empty version banner".to_string()))?;
    let info = match line.rsplit_once(char::is_whitespace) {
        Some((name, version)) => BackendInfo {
            name: name.trim().to_string(),
            version: version.to_string(),
        },
        None => BackendInfo {
            name: line.to_string(),
            version: String::new(),
        },
    };
    Ok(info)
}

/// Extracts the job id from the confirmation printed by `qsub`.
pub fn parse_submit_output(output: &str) -> Result<JobId, GridEngineError> {
    for line in output.lines().map(|line| line.trim()) {
        if let Some(captures) = SUBMIT_REGEX
            .captures(line)
            .or_else(|| TERSE_SUBMIT_REGEX.captures(line))
        {
            return Ok(captures[1].to_string());
        }
    }
    Err(parse_error(
        "qsub",
        format!("Cannot find job id in `{}`", output.trim()),
    ))
}
