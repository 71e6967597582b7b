//! Admission control of submission requests.
//!
//! A request is checked against the blacklist and whitelist, the global and per-user sliding
//! windows and the ceiling of concurrently tracked jobs. Accepted requests are submitted into
//! the grid engine and handed over to the job monitor.
pub mod audit;
mod controller;
pub mod lists;
pub mod window;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::error::GridgateError;
use crate::common::time::EpochMillis;

pub use controller::AdmissionController;

/// Submission request handed over by the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub ip: String,
    /// Epoch milliseconds.
    pub time: EpochMillis,
    /// Path to the job-spec JSON file.
    pub job_path: PathBuf,
}

/// Policy reason of a rejected request. Denials are expected and are not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    #[error("blacklisted")]
    Blacklisted,
    #[error("global capacity")]
    GlobalCapacity,
    #[error("user capacity")]
    UserCapacity,
    #[error("concurrent job capacity")]
    ConcurrentJobCapacity,
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Request denied: {0}")]
    Denied(DenialReason),
    #[error(transparent)]
    Failed(#[from] GridgateError),
}

impl RequestError {
    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            RequestError::Denied(reason) => Some(*reason),
            RequestError::Failed(_) => None,
        }
    }

    pub fn to_rejection(&self) -> Rejection {
        let description = match self {
            RequestError::Denied(reason) => reason.to_string(),
            RequestError::Failed(error) => error.to_string(),
        };
        Rejection {
            status: false,
            description,
        }
    }
}

/// Rejection reply of the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub status: bool,
    pub description: String,
}

/// Strips the IPv4-mapped IPv6 prefix, so `::ffff:1.2.3.4` and `1.2.3.4` are the same requester.
pub fn normalize_identity(ip: &str) -> String {
    let ip = ip.trim();
    ip.strip_prefix("::ffff:")
        .or_else(|| ip.strip_prefix("::FFFF:"))
        .unwrap_or(ip)
        .to_string()
}
