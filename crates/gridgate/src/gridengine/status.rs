use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::gridengine::GridEngineError;

/// Canonical job status, independent of the raw Grid Engine state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Undetermined,
    Queued,
    OnHold,
    Running,
    Suspended,
    Error,
    Completed,
    Terminated,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Terminated
        )
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Undetermined => "UNDETERMINED",
            JobStatus::Queued => "QUEUED",
            JobStatus::OnHold => "ON_HOLD",
            JobStatus::Running => "RUNNING",
            JobStatus::Suspended => "SUSPENDED",
            JobStatus::Error => "ERROR",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Maps a raw `qstat` state code of a single job (or task) to its canonical status.
pub fn map_raw_state(state: &str) -> JobStatus {
    match state {
        "qw" => JobStatus::Queued,
        "hqw" | "hRqw" | "hRwq" => JobStatus::OnHold,
        "r" | "t" | "Rr" | "Rt" => JobStatus::Running,
        "s" | "ts" | "S" | "tS" | "T" | "tT" | "Rs" | "Rts" | "RS" | "RtS" | "RT" | "RtT" => {
            JobStatus::Suspended
        }
        "Eqw" | "Ehqw" | "EhRqw" => JobStatus::Error,
        _ => JobStatus::Undetermined,
    }
}

/// Status of an array job as a whole: `Error` if any task failed, otherwise undetermined.
pub fn aggregate_array_status<I: IntoIterator<Item = JobStatus>>(tasks: I) -> JobStatus {
    if tasks.into_iter().any(|status| status == JobStatus::Error) {
        JobStatus::Error
    } else {
        JobStatus::Undetermined
    }
}

/// Expands a `ja-task-ID` column value such as `1-10:2`, `7` or `1-3:1,5` into task ids.
pub fn expand_task_range(spec: &str) -> Result<Vec<u32>, GridEngineError> {
    let invalid = || GridEngineError::Parse {
        program: "qstat".to_string(),
        message: format!("Invalid task range `{spec}`"),
    };

    let mut ids = Vec::new();
    for part in spec.split(',').filter(|part| !part.is_empty()) {
        let (range, step) = match part.split_once(':') {
            Some((range, step)) => (range, step.parse::<u32>().map_err(|_| invalid())?),
            None => (part, 1),
        };
        let (start, end) = match range.split_once('-') {
            Some((start, end)) => (
                start.parse::<u32>().map_err(|_| invalid())?,
                end.parse::<u32>().map_err(|_| invalid())?,
            ),
            None => {
                let id = range.parse::<u32>().map_err(|_| invalid())?;
                (id, id)
            }
        };
        if step == 0 || end < start {
            return Err(invalid());
        }
        ids.extend((start..=end).step_by(step as usize));
    }
    Ok(ids)
}
