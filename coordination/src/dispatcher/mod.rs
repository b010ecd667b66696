//! Dispatcher: execution path selection and bounded executor calls
//!
//! A job runs offline unless it allows online execution and its prompt
//! contains an online keyword. Online jobs pick a connector, pass a cost
//! pre-flight, and have their prompt redacted first when marked sensitive.
//! Every executor call runs in its own task under a timeout. Faults, panics
//! and timeouts all come back as FAILED job results; nothing escapes
//! [`Dispatcher::dispatch`].

pub mod budget;
pub mod executor;
pub mod http;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::gate::redact::{redact, RedactionMark};
use crate::job::{JobPacket, JobResult, ResultStatus};
use crate::router::{estimate_cost, requires_online, select_connector};

pub use budget::{CostLimits, SpendCheck, SpendLedger};
pub use executor::{Executor, ExecutorOutput, ExecutorRegistry, OFFLINE_EXECUTOR};
pub use http::HttpExecutor;

/// Default bounded time per executor call
pub const DEFAULT_EXECUTOR_TIMEOUT: Duration = Duration::from_secs(300);

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub executor_timeout: Duration,
    pub limits: CostLimits,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            executor_timeout: DEFAULT_EXECUTOR_TIMEOUT,
            limits: CostLimits::default(),
        }
    }
}

/// Chosen execution path for a job
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionPath {
    Offline,
    Online { connector: String, cost: f64 },
}

/// Runs claimed jobs through executors
#[derive(Debug)]
pub struct Dispatcher {
    executors: ExecutorRegistry,
    ledger: Arc<SpendLedger>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(executors: ExecutorRegistry, ledger: Arc<SpendLedger>, config: DispatcherConfig) -> Self {
        Self {
            executors,
            ledger,
            config,
        }
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    /// Decide the execution path without running anything
    pub fn select_path(&self, packet: &JobPacket) -> ExecutionPath {
        if !(packet.allow_online && requires_online(&packet.prompt)) {
            return ExecutionPath::Offline;
        }
        let connector = select_connector(&packet.prompt);
        ExecutionPath::Online {
            connector: connector.name().to_string(),
            cost: estimate_cost(&packet.prompt, connector),
        }
    }

    /// Run a job and return its result; never fails
    pub async fn dispatch(&self, packet: &JobPacket) -> JobResult {
        let started = Instant::now();

        let result = match self.select_path(packet) {
            ExecutionPath::Offline => {
                self.run(OFFLINE_EXECUTOR, packet.clone(), started)
                    .await
                    .with_path(true, None)
            }
            ExecutionPath::Online { connector, cost } => {
                self.dispatch_online(packet, &connector, cost, started).await
            }
        };

        JobResult {
            retry_count: packet.retry_count,
            ..result
        }
    }

    async fn dispatch_online(&self, packet: &JobPacket, connector: &str, cost: f64, started: Instant) -> JobResult {
        let today = Utc::now().date_naive();

        match self.ledger.try_reserve(today, cost, &self.config.limits) {
            Ok(SpendCheck::Reserved) => {}
            Ok(SpendCheck::Exceeded(reason)) => {
                warn!(job_id = %packet.id, connector, cost, "Online job refused by cost pre-flight");
                return JobResult::failed(&packet.id, reason)
                    .with_path(false, Some(connector.to_string()))
                    .with_cost(cost)
                    .with_execution_time(started.elapsed().as_secs_f64());
            }
            Err(e) => {
                warn!(job_id = %packet.id, error = %e, "Spend ledger unavailable");
                return JobResult::failed(&packet.id, format!("spend ledger unavailable: {}", e))
                    .with_path(false, Some(connector.to_string()))
                    .with_execution_time(started.elapsed().as_secs_f64());
            }
        }

        let mut working = packet.clone();
        let mut redactions: Vec<RedactionMark> = Vec::new();
        if packet.sensitive {
            let redaction = redact(&packet.prompt);
            if !redaction.is_clean() {
                info!(
                    job_id = %packet.id,
                    count = redaction.log.len(),
                    "Prompt redacted before online execution"
                );
            }
            redactions = redaction.marks();
            working.prompt = redaction.text;
        }

        let mut result = self
            .run(connector, working, started)
            .await
            .with_path(false, Some(connector.to_string()));
        result.redactions = redactions;

        // A cost reported by the executor replaces the estimate
        let actual = result.cost_estimate.unwrap_or(cost);
        result.cost_estimate = Some(actual);

        let settled = if result.is_success() {
            self.settle(today, cost, actual)
        } else {
            self.ledger.refund(today, cost)
        };
        if let Err(e) = settled {
            warn!(job_id = %packet.id, error = %e, "Failed to settle online spend");
        }
        result
    }

    /// Adjust a reservation of `reserved` to the `actual` spend
    fn settle(&self, day: NaiveDate, reserved: f64, actual: f64) -> DispatchResult<()> {
        let delta = actual - reserved;
        if delta > 0.0 {
            self.ledger.record(day, delta)
        } else if delta < 0.0 {
            self.ledger.refund(day, -delta)
        } else {
            Ok(())
        }
    }

    /// Call an executor in its own task under the configured timeout
    async fn run(&self, name: &str, job: JobPacket, started: Instant) -> JobResult {
        let job_id = job.id.clone();
        let elapsed = || started.elapsed().as_secs_f64();

        let Some(executor) = self.executors.get(name) else {
            warn!(job_id = %job_id, executor = name, "No executor registered");
            return JobResult::failed(&job_id, format!("no executor registered for '{}'", name))
                .with_execution_time(elapsed());
        };

        let mut handle = tokio::spawn(async move { executor.execute(&job).await });
        let timeout = self.config.executor_timeout;

        let fault = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(output))) => {
                let result = into_result(&job_id, output).with_execution_time(elapsed());
                info!(job_id = %job_id, executor = name, status = %result.status, "Executor finished");
                return result;
            }
            Ok(Ok(Err(e))) => DispatchError::executor_fault(name, format!("{:#}", e)),
            Ok(Err(join_error)) if join_error.is_panic() => {
                DispatchError::executor_fault(name, "executor panicked")
            }
            Ok(Err(join_error)) => DispatchError::executor_fault(name, join_error.to_string()),
            Err(_) => {
                handle.abort();
                DispatchError::executor_fault(
                    name,
                    format!("timed out after {}s", timeout.as_secs_f64()),
                )
            }
        };

        warn!(job_id = %job_id, error = %fault, "Executor fault converted to FAILED result");
        JobResult::failed(&job_id, fault.to_string()).with_execution_time(elapsed())
    }
}

fn into_result(job_id: &str, output: ExecutorOutput) -> JobResult {
    let mut result = match output.status {
        ResultStatus::Success => JobResult::success(job_id, output.result_data),
        status => {
            let message = output
                .error_message
                .unwrap_or_else(|| format!("executor reported {}", status));
            match status {
                ResultStatus::Partial => JobResult::partial(job_id, output.result_data, message),
                _ => JobResult {
                    result_data: output.result_data,
                    ..JobResult::failed(job_id, message)
                },
            }
        }
    };
    result.files_touched = output.files_touched;
    if let Some(cost) = output.cost {
        result = result.with_cost(cost);
    }
    result
}
