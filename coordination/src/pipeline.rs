//! Job pipeline
//!
//! Wires the queue store, authorization gate, routing brain, dispatcher and
//! reporting into the three caller-facing operations: `submit`, `process`
//! (claim + dispatch) and `confirm`. Each collaborator is passed in through
//! [`Pipeline::open`]; there is no ambient state.
//!
//! ```text
//! submit ──► new/ ──process──► held/ ──confirm──► claimed/ ──► results/ + receipts/
//!                    └────────────────────────► claimed/ ──► results/ + receipts/
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::DispatchConfig;
use crate::dispatcher::{Dispatcher, ExecutorRegistry, SpendLedger};
use crate::error::{DispatchError, DispatchResult};
use crate::gate::{OpsManager, TokenVerdict, PERMISSION_OPS_ACTION};
use crate::job::{JobId, JobPacket, JobResult, QueueStatus};
use crate::queue::{Bucket, QueueStore, SharedQueueStore};
use crate::reporting::{ReceiptGenerator, ReportGenerator, ReportWriter, TransferReceipt};
use crate::router::{RoutingBrain, RoutingContext};

/// Error message recorded for held jobs that outlive the confirmation window
pub const ABANDONED_MESSAGE: &str = "abandoned: confirmation window elapsed";

/// Why a job was held instead of claimed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    /// The action or a target is protected; an OPS token is required
    OpsToken,
    /// Sensitive content may leave the machine; an acknowledgment is required
    SensitiveAck,
}

impl std::fmt::Display for HoldReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpsToken => write!(f, "requires OPS confirmation"),
            Self::SensitiveAck => write!(f, "requires sensitive data confirmation"),
        }
    }
}

/// What a confirmation caller supplies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub sensitive_confirmed: bool,
}

impl Confirmation {
    pub fn token(token_id: impl Into<String>) -> Self {
        Self {
            token_id: Some(token_id.into()),
            sensitive_confirmed: false,
        }
    }

    pub fn sensitive() -> Self {
        Self {
            token_id: None,
            sensitive_confirmed: true,
        }
    }

    pub fn with_sensitive(mut self, confirmed: bool) -> Self {
        self.sensitive_confirmed = confirmed;
        self
    }
}

/// Result of driving a job through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Frozen in REQUIRES_CONFIRMATION
    Held { job_id: JobId, reasons: Vec<HoldReason> },
    /// Dispatched; result and receipt are stored
    Completed {
        result: JobResult,
        receipt: TransferReceipt,
    },
}

impl JobOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Held { job_id, .. } => job_id,
            Self::Completed { result, .. } => &result.job_id,
        }
    }

    pub fn is_held(&self) -> bool {
        matches!(self, Self::Held { .. })
    }
}

/// The dispatch core
#[derive(Debug)]
pub struct Pipeline {
    store: SharedQueueStore,
    ops: Arc<OpsManager>,
    brain: RoutingBrain,
    dispatcher: Dispatcher,
    reports: ReportGenerator,
    report_writer: ReportWriter,
    workspace: Option<PathBuf>,
    max_workers: usize,
}

impl Pipeline {
    /// Open every store under the configured root.
    ///
    /// Fails with `PolicyLoad` if the policy, token store or spend ledger is
    /// malformed.
    pub fn open(config: &DispatchConfig, executors: ExecutorRegistry) -> DispatchResult<Self> {
        config.validate()?;
        let ops_dir = config.ops_dir();
        let store = QueueStore::open(config.queue_dir())?.shared();
        let ops = Arc::new(OpsManager::open(&ops_dir)?);
        let ledger = Arc::new(SpendLedger::open(&ops_dir)?);

        info!(
            root = %config.root.display(),
            executors = ?executors.names(),
            "Dispatch pipeline opened"
        );

        Ok(Self {
            store,
            ops,
            brain: RoutingBrain::new(),
            dispatcher: Dispatcher::new(executors, ledger, config.dispatcher_config()),
            reports: ReportGenerator::new(&config.station, &config.destination),
            report_writer: ReportWriter::open(config.reports_dir())?,
            workspace: config.workspace.clone(),
            max_workers: config.max_workers,
        })
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn ops(&self) -> &OpsManager {
        &self.ops
    }

    pub fn report_writer(&self) -> &ReportWriter {
        &self.report_writer
    }

    // =========================================================================
    // Submit
    // =========================================================================

    /// Gate-classify a packet and store it in the New bucket
    pub fn submit(&self, mut packet: JobPacket) -> DispatchResult<JobId> {
        packet.ops_action = self
            .ops
            .check_authorization_required(&packet.prompt, &packet.targets);
        packet.max_retries = packet.max_retries.min(self.ops.policy().max_retry_attempts);
        packet.human_confirmed = false;

        let id = self.store.submit(&packet)?;
        info!(job_id = %id, ops_action = packet.ops_action, summary = %packet.summary(), "Job accepted");
        Ok(id)
    }

    /// Submit a fresh copy of a FAILED job with its retry count bumped
    pub fn resubmit(&self, job_id: &str) -> DispatchResult<JobId> {
        if self.store.current_status(job_id)? != QueueStatus::Failed {
            return Err(DispatchError::retry_not_allowed(
                job_id,
                "no FAILED result to retry",
            ));
        }
        let previous = self.store.peek(Bucket::Claimed, job_id)?;
        if !previous.can_retry() {
            return Err(DispatchError::retry_not_allowed(
                job_id,
                format!("used all {} retries", previous.max_retries),
            ));
        }

        let fresh = JobPacket::new(previous.prompt.clone());
        let retry = JobPacket {
            id: fresh.id,
            created_at: fresh.created_at,
            retry_count: previous.retry_count + 1,
            human_confirmed: false,
            ..previous
        };
        let id = self.submit(retry)?;
        info!(job_id = %id, previous = job_id, "Job resubmitted");
        Ok(id)
    }

    // =========================================================================
    // Process / confirm
    // =========================================================================

    fn hold_reasons(&self, packet: &JobPacket) -> Vec<HoldReason> {
        let mut reasons = Vec::new();
        if packet.ops_action
            || self
                .ops
                .check_authorization_required(&packet.prompt, &packet.targets)
        {
            reasons.push(HoldReason::OpsToken);
        }
        if packet.needs_sensitive_ack() {
            reasons.push(HoldReason::SensitiveAck);
        }
        reasons
    }

    /// Gate a New job; hold it, or claim and dispatch it
    pub async fn process(&self, job_id: &str) -> DispatchResult<JobOutcome> {
        let packet = self.store.peek(Bucket::New, job_id)?;
        let reasons = self.hold_reasons(&packet);

        if !reasons.is_empty() {
            self.store.hold(job_id)?;
            let secondary = self
                .ops
                .requires_secondary_confirmation(&packet.prompt, &packet.targets);
            info!(job_id, reasons = ?reasons, secondary, "Job requires confirmation");
            return Ok(JobOutcome::Held {
                job_id: job_id.to_string(),
                reasons,
            });
        }

        let packet = self.store.claim(job_id)?;
        self.execute(packet).await
    }

    /// Validate a confirmation and, if sufficient, release and dispatch
    pub async fn confirm(&self, job_id: &str, confirmation: &Confirmation) -> DispatchResult<JobOutcome> {
        let packet = self.store.peek(Bucket::Held, job_id)?;

        for reason in self.hold_reasons(&packet) {
            match reason {
                HoldReason::OpsToken => self.check_ops_token(job_id, confirmation)?,
                HoldReason::SensitiveAck if !confirmation.sensitive_confirmed => {
                    return Err(DispatchError::invalid_confirmation(
                        job_id,
                        "sensitive data acknowledgment required",
                    ));
                }
                HoldReason::SensitiveAck => {}
            }
        }

        let mut packet = self.store.release(job_id)?;
        packet.human_confirmed = true;
        self.store.update_claimed(&packet)?;
        info!(job_id, "Job confirmed");

        self.execute(packet).await
    }

    fn check_ops_token(&self, job_id: &str, confirmation: &Confirmation) -> DispatchResult<()> {
        let Some(token_id) = confirmation.token_id.as_deref() else {
            return Err(DispatchError::invalid_confirmation(job_id, "OPS token required"));
        };
        match self.ops.check_token(token_id)? {
            TokenVerdict::Valid(token) if token.has_permission(PERMISSION_OPS_ACTION) => Ok(()),
            TokenVerdict::Valid(_) => Err(DispatchError::invalid_confirmation(
                job_id,
                format!("token lacks '{}' permission", PERMISSION_OPS_ACTION),
            )),
            verdict => {
                warn!(job_id, reason = verdict.reason(), "OPS token rejected");
                Err(DispatchError::invalid_confirmation(job_id, verdict.reason()))
            }
        }
    }

    /// Route, dispatch and record a claimed job
    async fn execute(&self, packet: JobPacket) -> DispatchResult<JobOutcome> {
        let job_id = packet.id.clone();
        let workspace = packet
            .workspace
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| self.workspace.clone());

        let routing = workspace
            .as_deref()
            .map(|ws| self.brain.detect_context(ws, &packet.targets));
        if let Some(routing) = &routing {
            info!(
                job_id = %job_id,
                persona = %routing.agent_role,
                context = %routing.context_type,
                confidence = routing.confidence,
                "Job routed"
            );
        }

        let mut result = self.dispatcher.dispatch(&packet).await;
        if let Some(routing) = &routing {
            attach_routing(&mut result, routing);
        }

        self.finish(&packet, result, workspace.as_deref())
    }

    /// Store result, receipt and reports, in that order
    fn finish(&self, packet: &JobPacket, result: JobResult, workspace: Option<&Path>) -> DispatchResult<JobOutcome> {
        self.store.store_result(&packet.id, &result)?;

        let receipts = match workspace {
            Some(ws) => ReceiptGenerator::new().with_base_dir(ws),
            None => ReceiptGenerator::new(),
        };
        let receipt = receipts.make_receipt(&packet.id, &result, packet.human_confirmed);
        self.store.store_receipt(&receipt)?;

        for report in self.reports.reports_for(&packet.id, &result, packet.ops_action) {
            if let Err(e) = self.report_writer.write(&report) {
                warn!(job_id = %packet.id, error = %e, "Failed to write station report");
            }
        }

        Ok(JobOutcome::Completed { result, receipt })
    }

    // =========================================================================
    // Worker pool and sweeps
    // =========================================================================

    /// Process every job currently in New, up to `max_workers` at a time
    pub async fn run_pending(self: &Arc<Self>) -> DispatchResult<Vec<(JobId, DispatchResult<JobOutcome>)>> {
        let ids = self.store.list(Bucket::New)?;
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut join_set: JoinSet<(JobId, DispatchResult<JobOutcome>)> = JoinSet::new();

        for id in ids {
            let pipeline = Arc::clone(self);
            let permits = Arc::clone(&permits);
            join_set.spawn(async move {
                let Ok(_permit) = permits.acquire().await else {
                    return (id, Err(DispatchError::config("worker pool closed")));
                };
                let outcome = pipeline.process(&id).await;
                (id, outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    if let Err(e) = &outcome {
                        warn!(job_id = %id, error = %e, code = e.code(), "Job not processed");
                    }
                    outcomes.push((id, outcome));
                }
                Err(e) => warn!(error = %e, "Pipeline worker panicked"),
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(outcomes)
    }

    /// Fail every held job created before the confirmation window.
    ///
    /// Each abandoned job gets a FAILED result and a receipt. Jobs confirmed
    /// concurrently are skipped. Returns the ids that were expired.
    ///
    /// If recording an abandoned job fails after it left Held, the FAILED
    /// result is still written when possible so the job never sits in
    /// PROCESSING with no result.
    pub fn expire_abandoned(&self, now: DateTime<Utc>) -> DispatchResult<Vec<JobId>> {
        let hours = self.ops.policy().confirmation_window_hours;
        let window = Duration::try_hours(hours).ok_or_else(|| {
            DispatchError::config(format!("confirmation window of {} hours is out of range", hours))
        })?;
        let mut expired = Vec::new();

        for id in self.store.list(Bucket::Held)? {
            let packet = match self.store.peek(Bucket::Held, &id) {
                Ok(packet) => packet,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            if now - packet.created_at < window {
                continue;
            }
            let packet = match self.store.release(&id) {
                Ok(packet) => packet,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };

            let result = JobResult::failed(&id, ABANDONED_MESSAGE)
                .with_path(!packet.allow_online, None)
                .with_execution_time(0.0);
            let result = JobResult {
                retry_count: packet.retry_count,
                ..result
            };
            if let Err(e) = self.finish(&packet, result.clone(), None) {
                warn!(job_id = %id, error = %e, "Failed to record abandoned job");
                if self.store.get_result(&id).is_err() {
                    if let Err(retry) = self.store.store_result(&id, &result) {
                        warn!(job_id = %id, error = %retry, "Abandoned job left without a result");
                    }
                }
                return Err(e);
            }
            info!(job_id = %id, created_at = %packet.created_at, "Held job abandoned");
            expired.push(id);
        }
        Ok(expired)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn status(&self, job_id: &str) -> DispatchResult<QueueStatus> {
        self.store.current_status(job_id)
    }

    pub fn result(&self, job_id: &str) -> DispatchResult<JobResult> {
        self.store.get_result(job_id)
    }

    pub fn receipt(&self, job_id: &str) -> DispatchResult<TransferReceipt> {
        self.store.get_receipt(job_id)
    }
}

/// Record the routing decision in the result payload under `routing`
fn attach_routing(result: &mut JobResult, routing: &RoutingContext) {
    let Ok(value) = serde_json::to_value(routing) else {
        return;
    };
    match &mut result.result_data {
        Value::Object(map) => {
            map.insert("routing".to_string(), value);
        }
        data @ Value::Null => {
            *data = serde_json::json!({ "routing": value });
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Executor, ExecutorOutput, OFFLINE_EXECUTOR};
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::tempdir;

    struct Organizer;

    #[async_trait]
    impl Executor for Organizer {
        fn name(&self) -> &str {
            OFFLINE_EXECUTOR
        }

        async fn execute(&self, _job: &JobPacket) -> anyhow::Result<ExecutorOutput> {
            Ok(ExecutorOutput::success(json!({"action": "organize", "categories": {}})))
        }
    }

    fn pipeline() -> (Pipeline, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DispatchConfig {
            root: dir.path().join("root"),
            ..DispatchConfig::default()
        };
        let executors = ExecutorRegistry::new().with(Arc::new(Organizer));
        (Pipeline::open(&config, executors).unwrap(), dir)
    }

    #[tokio::test]
    async fn test_plain_job_completes() {
        let (p, _dir) = pipeline();
        let id = p.submit(JobPacket::new("organize files")).unwrap();
        assert_eq!(p.status(&id).unwrap(), QueueStatus::Queued);

        let outcome = p.process(&id).await.unwrap();
        assert!(!outcome.is_held());
        assert_eq!(p.status(&id).unwrap(), QueueStatus::Completed);
        assert!(p.receipt(&id).is_ok());
    }

    #[tokio::test]
    async fn test_ops_action_held_then_needs_token() {
        let (p, _dir) = pipeline();
        let id = p.submit(JobPacket::new("modify OPS tokens please")).unwrap();

        let outcome = p.process(&id).await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Held {
                job_id: id.clone(),
                reasons: vec![HoldReason::OpsToken]
            }
        );
        assert_eq!(p.status(&id).unwrap(), QueueStatus::RequiresConfirmation);

        let err = p.confirm(&id, &Confirmation::default()).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfirmation { .. }));
        assert_eq!(p.status(&id).unwrap(), QueueStatus::RequiresConfirmation);
    }

    #[tokio::test]
    async fn test_token_without_permission_rejected() {
        let (p, _dir) = pipeline();
        let id = p.submit(JobPacket::new("change security settings")).unwrap();
        p.process(&id).await.unwrap();

        let token = p.ops().issue_token(["read"], None).unwrap();
        let err = p.confirm(&id, &Confirmation::token(token)).await.unwrap_err();
        assert!(err.to_string().contains("permission"));
    }

    #[tokio::test]
    async fn test_process_twice_is_not_found() {
        let (p, _dir) = pipeline();
        let id = p.submit(JobPacket::new("organize")).unwrap();
        p.process(&id).await.unwrap();
        assert!(p.process(&id).await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_attach_routing_to_null_payload() {
        let mut result = JobResult::success("job-1", Value::Null);
        let routing = RoutingBrain::new().detect_context(Path::new("/nonexistent-ws"), &["a.md"]);
        attach_routing(&mut result, &routing);
        assert_eq!(result.result_data["routing"]["agent_role"], "@LIGHTHOUSE");
    }
}
