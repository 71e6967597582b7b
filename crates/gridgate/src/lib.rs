#![deny(clippy::await_holding_refcell_ref)]

pub mod admission;
pub mod broker;
pub mod common;
pub mod config;
pub mod gridengine;
pub mod monitor;
pub mod session;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::GridgateError;
pub type Result<T> = std::result::Result<T, Error>;

pub type Map<K, V> = std::collections::HashMap<K, V>;
pub type Set<T> = std::collections::HashSet<T>;

/// Identifier assigned to a job by the grid engine (`qsub`).
pub type JobId = String;

pub use common::wrapped::WrappedRcRefCell;

pub const GRIDGATE_VERSION: &str = env!("CARGO_PKG_VERSION");
