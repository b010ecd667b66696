//! Job packet and job result types
//!
//! A job packet is immutable once submitted: only its recorded status (which
//! mirrors the bucket it sits in) and the confirmation flag are ever
//! rewritten. A job result is created exactly once per dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DispatchError, DispatchResult};
use crate::gate::redact::RedactionMark;

/// Unique identifier for a job
pub type JobId = String;

/// Default persona when the submitter does not name one
pub const DEFAULT_ROLE: &str = "@MASTER";

/// Default execution mode tag
pub const DEFAULT_MODE: &str = "!ANALYTICAL";

/// Default submitting user
pub const DEFAULT_USER: &str = "local";

/// Default retry ceiling for a packet
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const MAX_JOB_ID_LENGTH: usize = 128;

/// Generate a time-prefixed, monotonically sortable job id.
///
/// Format: `job-YYYYMMDD-HHMMSS-ffffff-xxxxxxxx` (UTC, microseconds, 8 hex).
pub fn generate_job_id() -> JobId {
    generate_job_id_at(Utc::now())
}

/// Generate a job id for a given instant
pub fn generate_job_id_at(now: DateTime<Utc>) -> JobId {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("job-{}-{}", now.format("%Y%m%d-%H%M%S-%6f"), &suffix[..8])
}

/// Check that a job id is safe to use as a bucket file name
pub fn validate_job_id(job_id: &str) -> DispatchResult<()> {
    if job_id.is_empty() {
        return Err(DispatchError::invalid_job_id(job_id, "empty"));
    }
    if job_id.len() > MAX_JOB_ID_LENGTH {
        return Err(DispatchError::invalid_job_id(
            job_id,
            format!("longer than {} characters", MAX_JOB_ID_LENGTH),
        ));
    }
    if job_id.starts_with('.') {
        return Err(DispatchError::invalid_job_id(job_id, "leading dot"));
    }
    if let Some(bad) = job_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(DispatchError::invalid_job_id(
            job_id,
            format!("character '{}' not allowed", bad.escape_default()),
        ));
    }
    Ok(())
}

/// Lifecycle status recorded on a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    New,
    Claimed,
    Processing,
    Completed,
    Failed,
    RequiresConfirmation,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Claimed => write!(f, "CLAIMED"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::RequiresConfirmation => write!(f, "REQUIRES_CONFIRMATION"),
        }
    }
}

/// Status derived purely from which bucket holds the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Queued,
    RequiresConfirmation,
    Processing,
    Completed,
    Failed,
    NotFound,
}

impl QueueStatus {
    /// Whether the job has reached a terminal result
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::RequiresConfirmation => write!(f, "REQUIRES_CONFIRMATION"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::NotFound => write!(f, "NOT_FOUND"),
        }
    }
}

/// The unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPacket {
    /// Immutable identifier
    pub id: JobId,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Submitting user
    pub user: String,

    /// Agent persona tag (e.g. `@MASTER`)
    pub role: String,

    /// Execution mode tag (e.g. `!ANALYTICAL`)
    pub mode: String,

    /// Free-text instruction
    pub prompt: String,

    /// Paths or resource identifiers the job may touch, in order
    #[serde(default)]
    pub targets: Vec<String>,

    /// Submitter marked the content as sensitive
    #[serde(default)]
    pub sensitive: bool,

    /// Permission to use network-backed execution
    #[serde(default)]
    pub allow_online: bool,

    /// Computed by the authorization gate at submit time
    #[serde(default)]
    pub ops_action: bool,

    /// Last recorded status; the bucket location is authoritative
    pub status: JobStatus,

    /// Priority, 1 (lowest) to 5
    pub priority: u8,

    /// Times this job has been re-dispatched by the caller
    #[serde(default)]
    pub retry_count: u32,

    /// Retry ceiling (caller-enforced)
    pub max_retries: u32,

    /// Workspace the routing brain should inspect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    /// A human confirmed this job through the gate
    #[serde(default)]
    pub human_confirmed: bool,
}

impl JobPacket {
    /// Create a new packet with a fresh id and defaults
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: generate_job_id(),
            created_at: Utc::now(),
            user: DEFAULT_USER.to_string(),
            role: DEFAULT_ROLE.to_string(),
            mode: DEFAULT_MODE.to_string(),
            prompt: prompt.into(),
            targets: Vec::new(),
            sensitive: false,
            allow_online: false,
            ops_action: false,
            status: JobStatus::New,
            priority: 1,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            workspace: None,
            human_confirmed: false,
        }
    }

    /// Use a caller-supplied id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set targets
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Set the submitting user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the persona tag
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Set the mode tag
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    /// Mark as sensitive
    pub fn sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }

    /// Allow network-backed execution
    pub fn allow_online(mut self, allow: bool) -> Self {
        self.allow_online = allow;
        self
    }

    /// Set priority, clamped to 1..=5
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 5);
        self
    }

    /// Record how many times the caller has re-dispatched this job
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the retry ceiling
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the workspace to inspect for routing
    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Whether the job needs an explicit sensitive-data acknowledgment
    pub fn needs_sensitive_ack(&self) -> bool {
        self.sensitive && self.allow_online
    }

    /// Whether the caller may re-dispatch this job
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Get a compact summary for logging
    pub fn summary(&self) -> String {
        format!(
            "JobPacket[id={}, role={}, targets={}, online={}, sensitive={}, ops={}]",
            self.id,
            self.role,
            self.targets.len(),
            self.allow_online,
            self.sensitive,
            self.ops_action,
        )
    }
}

/// Outcome of one executor invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    Failed,
    Partial,
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
            Self::Partial => write!(f, "PARTIAL"),
        }
    }
}

/// Outcome of dispatching one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Job this result belongs to
    pub job_id: JobId,

    /// Outcome status
    pub status: ResultStatus,

    /// Opaque payload produced by the executor
    #[serde(default)]
    pub result_data: Value,

    /// Present iff status is not SUCCESS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Paths the executor touched, in order
    #[serde(default)]
    pub files_touched: Vec<String>,

    /// Wall-clock seconds, recorded regardless of outcome
    #[serde(default)]
    pub execution_time: f64,

    /// Ran on the offline path
    pub offline: bool,

    /// Online connector, when one was selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_used: Option<String>,

    /// Estimated cost in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,

    /// Retry count of the packet that produced this result
    #[serde(default)]
    pub retry_count: u32,

    /// Redactions applied before execution (no original values)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redactions: Vec<RedactionMark>,
}

impl JobResult {
    /// Create a successful result
    pub fn success(job_id: impl Into<String>, result_data: Value) -> Self {
        Self {
            job_id: job_id.into(),
            status: ResultStatus::Success,
            result_data,
            error_message: None,
            files_touched: Vec::new(),
            execution_time: 0.0,
            offline: true,
            connector_used: None,
            cost_estimate: None,
            retry_count: 0,
            redactions: Vec::new(),
        }
    }

    /// Create a failed result carrying a human-readable message
    pub fn failed(job_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Failed,
            error_message: Some(error_message.into()),
            result_data: Value::Object(Default::default()),
            ..Self::success(job_id, Value::Null)
        }
    }

    /// Create a partial result; partial results still carry an error message
    pub fn partial(
        job_id: impl Into<String>,
        result_data: Value,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            status: ResultStatus::Partial,
            error_message: Some(error_message.into()),
            ..Self::success(job_id, result_data)
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

    /// Set execution path and connector
    pub fn with_path(mut self, offline: bool, connector: Option<String>) -> Self {
        self.offline = offline;
        self.connector_used = connector;
        self
    }

    /// Set elapsed time, clamped to be non-negative
    pub fn with_execution_time(mut self, seconds: f64) -> Self {
        self.execution_time = seconds.max(0.0);
        self
    }

    /// Set the cost estimate, clamped to be non-negative
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_estimate = Some(cost.max(0.0));
        self
    }

    /// Whether this result is a success
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// Action name reported by the executor payload (`process` if absent)
    pub fn action(&self) -> &str {
        self.result_data
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("process")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_job_id_format_and_ordering() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 6).unwrap();

        let a = generate_job_id_at(early);
        let b = generate_job_id_at(late);

        assert!(a.starts_with("job-20260102-030405-000000-"));
        assert_eq!(a.len(), "job-20260102-030405-000000-".len() + 8);
        assert!(a < b, "ids must sort by creation time");
        assert!(validate_job_id(&a).is_ok());
    }

    #[test]
    fn test_validate_job_id_rejects_path_tricks() {
        assert!(validate_job_id("").is_err());
        assert!(validate_job_id("../etc/passwd").is_err());
        assert!(validate_job_id(".hidden").is_err());
        assert!(validate_job_id("a/b").is_err());
        assert!(validate_job_id(&"x".repeat(129)).is_err());
        assert!(validate_job_id("job-1_a.b").is_ok());
    }

    #[test]
    fn test_packet_defaults() {
        let packet = JobPacket::new("organize downloads");
        assert_eq!(packet.role, DEFAULT_ROLE);
        assert_eq!(packet.status, JobStatus::New);
        assert_eq!(packet.max_retries, DEFAULT_MAX_RETRIES);
        assert!(!packet.allow_online);
        assert!(!packet.needs_sensitive_ack());
        assert!(packet.can_retry());
    }

    #[test]
    fn test_priority_is_clamped() {
        assert_eq!(JobPacket::new("x").with_priority(0).priority, 1);
        assert_eq!(JobPacket::new("x").with_priority(9).priority, 5);
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_string(&JobStatus::RequiresConfirmation).unwrap();
        assert_eq!(json, "\"REQUIRES_CONFIRMATION\"");
        let json = serde_json::to_string(&ResultStatus::Partial).unwrap();
        assert_eq!(json, "\"PARTIAL\"");
    }

    #[test]
    fn test_failed_result_carries_message() {
        let result = JobResult::failed("job-1", "boom");
        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("boom"));
        assert!(!result.is_success());
    }

    #[test]
    fn test_result_action_defaults_to_process() {
        let result = JobResult::success("job-1", json!({"files_processed": 3}));
        assert_eq!(result.action(), "process");
        let result = JobResult::success("job-1", json!({"action": "clean"}));
        assert_eq!(result.action(), "clean");
    }

    #[test]
    fn test_execution_time_never_negative() {
        let result = JobResult::success("job-1", json!({})).with_execution_time(-1.0);
        assert_eq!(result.execution_time, 0.0);
    }
}
