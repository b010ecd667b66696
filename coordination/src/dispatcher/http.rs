//! HTTP-backed executor
//!
//! POSTs the job packet as JSON and decodes an [`ExecutorOutput`] from the
//! response body. Non-2xx responses are executor faults.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;

use super::executor::{Executor, ExecutorOutput};
use crate::error::{DispatchError, DispatchResult};
use crate::job::JobPacket;

/// Executor that delegates to a remote service
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    name: String,
    url: String,
    http: reqwest::Client,
}

impl HttpExecutor {
    /// Create an executor; `timeout` bounds each request
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> DispatchResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, job: &JobPacket) -> anyhow::Result<ExecutorOutput> {
        let response = self
            .http
            .post(&self.url)
            .json(job)
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("HTTP {}: {}", status, body);
        }

        response
            .json::<ExecutorOutput>()
            .await
            .context("decoding executor output")
    }
}
