//! Executor seam
//!
//! Executors do the actual work of a job. The core selects one by name and
//! treats it as opaque: whatever it returns or raises becomes a job result.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::{JobPacket, ResultStatus};

/// Name of the executor used for the offline path
pub const OFFLINE_EXECUTOR: &str = "offline";

/// What an executor reports back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorOutput {
    #[serde(default = "default_status")]
    pub status: ResultStatus,
    #[serde(default)]
    pub result_data: Value,
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Actual cost, when the executor knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

fn default_status() -> ResultStatus {
    ResultStatus::Success
}

impl ExecutorOutput {
    /// Successful output with a payload
    pub fn success(result_data: Value) -> Self {
        Self {
            status: ResultStatus::Success,
            result_data,
            files_touched: Vec::new(),
            error_message: None,
            cost: None,
        }
    }

    /// Set touched files
    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files_touched = files.into_iter().map(Into::into).collect();
        self
    }

    /// Report the actual cost of the run
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// External capability that performs a job
#[async_trait]
pub trait Executor: Send + Sync {
    /// Registry name (`offline`, or a connector name such as `web_search`)
    fn name(&self) -> &str;

    /// Run a job. Errors are converted into FAILED results by the dispatcher.
    async fn execute(&self, job: &JobPacket) -> anyhow::Result<ExecutorOutput>;
}

/// Executors by name
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its own name, replacing any previous one
    pub fn register(&mut self, executor: Arc<dyn Executor>) -> &mut Self {
        self.executors.insert(executor.name().to_string(), executor);
        self
    }

    /// Builder-style register
    pub fn with(mut self, executor: Arc<dyn Executor>) -> Self {
        self.register(executor);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Executor for Echo {
        fn name(&self) -> &str {
            OFFLINE_EXECUTOR
        }

        async fn execute(&self, job: &JobPacket) -> anyhow::Result<ExecutorOutput> {
            Ok(ExecutorOutput::success(json!({ "prompt": job.prompt })))
        }
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = ExecutorRegistry::new().with(Arc::new(Echo));
        assert_eq!(registry.names(), vec!["offline"]);
        assert!(registry.get("web_search").is_none());

        let executor = registry.get(OFFLINE_EXECUTOR).unwrap();
        let out = executor.execute(&JobPacket::new("hi")).await.unwrap();
        assert_eq!(out.result_data["prompt"], "hi");
    }

    #[test]
    fn test_output_defaults_to_success() {
        let out: ExecutorOutput = serde_json::from_str(r#"{"files_touched": ["a"]}"#).unwrap();
        assert_eq!(out.status, ResultStatus::Success);
        assert_eq!(out.files_touched, vec!["a"]);
    }
}
