//! Dispatch configuration
//!
//! Loaded from an optional TOML file, then overridden by `DISPATCH_*`
//! environment variables. Everything else a pipeline needs (policy, tokens,
//! spend) lives under `root`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatcher::{CostLimits, DispatcherConfig};
use crate::error::{DispatchError, DispatchResult};
use crate::reporting::report::{DEFAULT_DESTINATION, DEFAULT_STATION};

/// Top-level dispatch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Queue, ops and reports root
    pub root: PathBuf,
    /// Directory the routing brain inspects when a job names none
    pub workspace: Option<PathBuf>,
    /// Bounded time per executor call
    pub executor_timeout_secs: u64,
    /// Jobs dispatched concurrently by `run_pending`
    pub max_workers: usize,
    pub daily_budget: f64,
    pub per_job_budget: f64,
    pub station: String,
    pub destination: String,
    /// Executor name -> HTTP endpoint
    pub executors: BTreeMap<String, String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".dispatch"),
            workspace: None,
            executor_timeout_secs: 300,
            max_workers: 4,
            daily_budget: 2.0,
            per_job_budget: 0.50,
            station: DEFAULT_STATION.to_string(),
            destination: DEFAULT_DESTINATION.to_string(),
            executors: BTreeMap::new(),
        }
    }
}

impl DispatchConfig {
    /// Parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> DispatchResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| DispatchError::config(format!("{}: {}", path.display(), e)))
    }

    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> DispatchResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `DISPATCH_*` overrides from a variable lookup
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> DispatchResult<Self> {
        if let Some(root) = lookup("DISPATCH_ROOT") {
            self.root = PathBuf::from(root);
        }
        if let Some(workspace) = lookup("DISPATCH_WORKSPACE") {
            self.workspace = Some(PathBuf::from(workspace));
        }
        if let Some(v) = lookup("DISPATCH_EXECUTOR_TIMEOUT_SECS") {
            self.executor_timeout_secs = parse_env("DISPATCH_EXECUTOR_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("DISPATCH_MAX_WORKERS") {
            self.max_workers = parse_env("DISPATCH_MAX_WORKERS", &v)?;
        }
        if let Some(v) = lookup("DISPATCH_DAILY_BUDGET") {
            self.daily_budget = parse_env("DISPATCH_DAILY_BUDGET", &v)?;
        }
        if let Some(v) = lookup("DISPATCH_PER_JOB_BUDGET") {
            self.per_job_budget = parse_env("DISPATCH_PER_JOB_BUDGET", &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> DispatchResult<()> {
        if self.executor_timeout_secs == 0 {
            return Err(DispatchError::config("executor_timeout_secs must be at least 1"));
        }
        if self.max_workers == 0 {
            return Err(DispatchError::config("max_workers must be at least 1"));
        }
        if self.daily_budget < 0.0 || self.per_job_budget < 0.0 {
            return Err(DispatchError::config("budgets must not be negative"));
        }
        Ok(())
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.root.join("queue")
    }

    pub fn ops_dir(&self) -> PathBuf {
        self.root.join("ops")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            executor_timeout: Duration::from_secs(self.executor_timeout_secs),
            limits: CostLimits {
                daily: self.daily_budget,
                per_job: self.per_job_budget,
            },
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> DispatchResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| DispatchError::config(format!("{}={:?}: {}", key, value, e)))
}
