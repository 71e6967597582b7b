//! Tunable broker parameters.
//!
//! The configuration is a flat JSON object whose keys are all optional. It is re-read lazily by
//! the admission controller once `configReloadInterval` has elapsed since the last read. A reload
//! either replaces the whole configuration or, when the file cannot be read or parsed, leaves the
//! previous values untouched.
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::error::GridgateError;
use crate::common::time::EpochMillis;
use crate::define_wrapped_type;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub max_requests_per_sec_user: usize,
    pub max_requests_per_sec_global: usize,
    /// Milliseconds of inactivity after which a user window is forgotten.
    pub user_lifespan: u64,
    /// Milliseconds a request stays inside a sliding window.
    pub request_lifespan: u64,
    pub max_concurrent_jobs: usize,
    pub max_job_running_time: u64,
    pub max_job_queued_time: u64,
    pub max_array_job_running_time: u64,
    pub max_array_job_queued_time: u64,
    pub local_list_path: Option<PathBuf>,
    pub global_list_path: Option<PathBuf>,
    pub monitor_poll_interval: u64,
    pub list_refresh_interval: u64,
    pub config_reload_interval: u64,
    pub session_name: String,
    pub audit_log_path: Option<PathBuf>,
    pub qsub_command: String,
    pub qstat_command: String,
    pub qacct_command: String,
    pub qdel_command: String,
    pub qmod_command: String,
    pub qhold_command: String,
    pub qrls_command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_requests_per_sec_user: 5,
            max_requests_per_sec_global: 50,
            user_lifespan: 60 * 60 * 1000,
            request_lifespan: 1000,
            max_concurrent_jobs: 100,
            max_job_running_time: 24 * 60 * 60 * 1000,
            max_job_queued_time: 60 * 60 * 1000,
            max_array_job_running_time: 48 * 60 * 60 * 1000,
            max_array_job_queued_time: 2 * 60 * 60 * 1000,
            local_list_path: None,
            global_list_path: None,
            monitor_poll_interval: 5000,
            list_refresh_interval: 60 * 1000,
            config_reload_interval: 30 * 1000,
            session_name: "gridgate".to_string(),
            audit_log_path: None,
            qsub_command: "qsub".to_string(),
            qstat_command: "qstat".to_string(),
            qacct_command: "qacct".to_string(),
            qdel_command: "qdel".to_string(),
            qmod_command: "qmod".to_string(),
            qhold_command: "qhold".to_string(),
            qrls_command: "qrls".to_string(),
        }
    }
}

impl Config {
    pub fn parse(data: &str) -> crate::Result<Config> {
        serde_json::from_str(data).map_err(|e| GridgateError::ConfigError(e.to_string()))
    }

    pub async fn load(path: &Path) -> crate::Result<Config> {
        let data = tokio::fs::read_to_string(path).await.map_err(|e| {
            GridgateError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&data)
    }

    pub fn max_job_running_time(&self) -> Duration {
        Duration::from_millis(self.max_job_running_time)
    }

    pub fn max_job_queued_time(&self) -> Duration {
        Duration::from_millis(self.max_job_queued_time)
    }

    pub fn max_array_job_running_time(&self) -> Duration {
        Duration::from_millis(self.max_array_job_running_time)
    }

    pub fn max_array_job_queued_time(&self) -> Duration {
        Duration::from_millis(self.max_array_job_queued_time)
    }

    pub fn monitor_poll_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_poll_interval.max(1))
    }

    pub fn list_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.list_refresh_interval.max(1))
    }
}

/// Holds the active configuration together with the bookkeeping needed for lazy reloads.
pub struct ConfigStore {
    path: Option<PathBuf>,
    config: Config,
    last_read: Option<EpochMillis>,
    /// The file was read by [`ConfigStore::open`]; the first request only starts the interval.
    read_on_open: bool,
}

define_wrapped_type!(ConfigRef, ConfigStore, pub);

impl ConfigStore {
    pub fn new(path: Option<PathBuf>, config: Config) -> Self {
        Self {
            path,
            config,
            last_read: None,
            read_on_open: false,
        }
    }

    /// Loads the initial configuration; an unusable file falls back to the built-in defaults.
    pub async fn open(path: Option<PathBuf>) -> Self {
        let config = match &path {
            Some(path) => Config::load(path).await.unwrap_or_else(|error| {
                log::warn!("Using default configuration: {error}");
                Config::default()
            }),
            None => Config::default(),
        };
        Self {
            read_on_open: path.is_some(),
            ..Self::new(path, config)
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns true when a config file is set and it was not read within the reload interval.
    pub fn needs_reload(&self, now: EpochMillis) -> bool {
        if self.path.is_none() {
            return false;
        }
        match self.last_read {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.config.config_reload_interval,
        }
    }

    /// Applies the outcome of a reload attempt. A failed attempt keeps the previous values.
    pub fn apply_reload(&mut self, result: crate::Result<Config>, now: EpochMillis) {
        self.last_read = Some(now);
        match result {
            Ok(config) => {
                if config != self.config {
                    log::info!("Configuration reloaded");
                    log::debug!("New configuration: {config:?}");
                }
                self.config = config;
            }
            Err(error) => {
                log::warn!("Configuration reload failed, keeping previous values: {error}");
            }
        }
    }
}

impl ConfigRef {
    pub fn snapshot(&self) -> Config {
        self.get().config().clone()
    }

    /// Re-reads the config file if the minimum reload interval has elapsed. Never fails.
    pub async fn reload_if_due(&self, now: EpochMillis) {
        let path = {
            let mut store = self.get_mut();
            if store.last_read.is_none() && store.read_on_open {
                store.last_read = Some(now);
                return;
            }
            if !store.needs_reload(now) {
                return;
            }
            store.path.clone()
        };
        if let Some(path) = path {
            let result = Config::load(&path).await;
            self.get_mut().apply_reload(result, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigRef, ConfigStore};
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn parse_partial_config_uses_defaults() {
        let config = Config::parse(r#"{"maxRequestsPerSecUser": 2, "requestLifespan": 5000}"#)
            .unwrap();
        assert_eq!(config.max_requests_per_sec_user, 2);
        assert_eq!(config.request_lifespan, 5000);
        assert_eq!(
            config.max_requests_per_sec_global,
            Config::default().max_requests_per_sec_global
        );
        assert_eq!(config.qsub_command, "qsub");
    }

    #[test]
    fn parse_invalid_config_fails() {
        assert!(Config::parse("{not json").is_err());
    }

    #[test]
    fn no_reload_without_path() {
        let store = ConfigStore::new(None, Config::default());
        assert!(!store.needs_reload(100_000));
    }

    #[test]
    fn reload_respects_interval() {
        let mut store = ConfigStore::new(Some(PathBuf::from("config.json")), Config::default());
        assert!(store.needs_reload(0));
        store.apply_reload(Ok(Config::default()), 1000);
        assert!(!store.needs_reload(1000 + 29_999));
        assert!(store.needs_reload(1000 + 30_000));
    }

    #[test]
    fn failed_reload_keeps_previous_values() {
        let config = Config {
            max_concurrent_jobs: 7,
            ..Default::default()
        };
        let mut store = ConfigStore::new(Some(PathBuf::from("config.json")), config);
        store.apply_reload(Config::parse("]"), 10);
        assert_eq!(store.config().max_concurrent_jobs, 7);
        assert!(!store.needs_reload(11));
    }

    #[tokio::test]
    async fn reload_from_file() {
        let dir = TempDir::with_prefix("gridgate").unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"maxConcurrentJobs": 3}"#).unwrap();

        let config = ConfigRef::new(ConfigStore::open(Some(path.clone())).await);
        assert_eq!(config.snapshot().max_concurrent_jobs, 3);

        std::fs::write(&path, r#"{"maxConcurrentJobs": 4}"#).unwrap();
        config.reload_if_due(1000).await;
        assert_eq!(config.snapshot().max_concurrent_jobs, 3);
        config.reload_if_due(1000 + 29_999).await;
        assert_eq!(config.snapshot().max_concurrent_jobs, 3);
        config.reload_if_due(1000 + 30_000).await;
        assert_eq!(config.snapshot().max_concurrent_jobs, 4);

        std::fs::write(&path, "broken").unwrap();
        config.reload_if_due(100_000).await;
        assert_eq!(config.snapshot().max_concurrent_jobs, 4);
    }

    #[tokio::test]
    async fn first_request_does_not_reread_opened_file() {
        let dir = TempDir::with_prefix("gridgate").unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"maxConcurrentJobs": 3}"#).unwrap();

        let config = ConfigRef::new(ConfigStore::open(Some(path.clone())).await);
        config.reload_if_due(0).await;
        assert!(!config.get().needs_reload(0));
        assert!(config.get().needs_reload(30_000));
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let store = ConfigStore::open(Some(PathBuf::from("/nonexistent/gridgate.json"))).await;
        assert_eq!(store.config(), &Config::default());
    }
}
