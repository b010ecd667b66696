//! Dispatch error types
//!
//! One taxonomy for the whole core. Queue misses, duplicate submissions and
//! rejected confirmations are recoverable and reported to the caller as typed
//! failures. Policy load failures are fatal at startup only. Executor faults
//! never leave the dispatcher; they are converted into FAILED job results.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dispatch core operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors that can occur in the dispatch core
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A packet with this id already exists in some bucket
    #[error("Duplicate job id: {job_id}")]
    DuplicateId { job_id: String },

    /// No packet/result with this id in the expected bucket
    #[error("Job not found: {job_id} ({bucket})")]
    NotFound { job_id: String, bucket: String },

    /// Confirmation was missing, expired, tampered or insufficient
    #[error("Invalid confirmation for {job_id}: {reason}")]
    InvalidConfirmation { job_id: String, reason: String },

    /// Wrapped failure from an external executor
    #[error("Executor '{executor}' failed: {message}")]
    ExecutorFault { executor: String, message: String },

    /// Malformed policy or token store
    #[error("Failed to load {path}: {message}")]
    PolicyLoad { path: PathBuf, message: String },

    /// Job id is not safe to use as a file name
    #[error("Invalid job id '{job_id}': {reason}")]
    InvalidJobId { job_id: String, reason: String },

    /// Resubmit refused: no FAILED result, or retries exhausted
    #[error("Cannot retry {job_id}: {reason}")]
    RetryNotAllowed { job_id: String, reason: String },

    /// A receipt was already written for this job
    #[error("Receipt already exists for {job_id}; receipts are immutable")]
    ReceiptExists { job_id: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML report serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DispatchError {
    /// Create a duplicate id error
    pub fn duplicate(job_id: impl Into<String>) -> Self {
        Self::DuplicateId {
            job_id: job_id.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(job_id: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self::NotFound {
            job_id: job_id.into(),
            bucket: bucket.into(),
        }
    }

    /// Create an invalid confirmation error
    pub fn invalid_confirmation(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfirmation {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an executor fault
    pub fn executor_fault(executor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutorFault {
            executor: executor.into(),
            message: message.into(),
        }
    }

    /// Create a policy load error
    pub fn policy_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PolicyLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid job id error
    pub fn invalid_job_id(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidJobId {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a retry refusal
    pub fn retry_not_allowed(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RetryNotAllowed {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateId { .. } => "DUPLICATE_ID",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidConfirmation { .. } => "INVALID_CONFIRMATION",
            Self::ExecutorFault { .. } => "EXECUTOR_FAULT",
            Self::PolicyLoad { .. } => "POLICY_LOAD_ERROR",
            Self::InvalidJobId { .. } => "INVALID_JOB_ID",
            Self::RetryNotAllowed { .. } => "RETRY_NOT_ALLOWED",
            Self::ReceiptExists { .. } => "RECEIPT_EXISTS",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Yaml(_) => "YAML_ERROR",
        }
    }

    /// Whether a worker can keep running after this error.
    ///
    /// Only policy/token store corruption is fatal, and only at startup.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::PolicyLoad { .. })
    }

    /// Whether this is a lookup miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(DispatchError::duplicate("a").code(), "DUPLICATE_ID");
        assert_eq!(DispatchError::not_found("a", "new").code(), "NOT_FOUND");
        assert_eq!(
            DispatchError::invalid_confirmation("a", "expired").code(),
            "INVALID_CONFIRMATION"
        );
        assert_eq!(
            DispatchError::policy_load("/tmp/policy.json", "bad").code(),
            "POLICY_LOAD_ERROR"
        );
        assert_eq!(
            DispatchError::retry_not_allowed("a", "used all 3 retries").code(),
            "RETRY_NOT_ALLOWED"
        );
    }

    #[test]
    fn test_only_policy_load_is_fatal() {
        assert!(!DispatchError::policy_load("/x", "bad").is_recoverable());
        assert!(DispatchError::duplicate("a").is_recoverable());
        assert!(DispatchError::not_found("a", "claimed").is_recoverable());
        assert!(DispatchError::executor_fault("offline", "boom").is_recoverable());
        assert!(DispatchError::retry_not_allowed("a", "no FAILED result").is_recoverable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = DispatchError::invalid_confirmation("job-1", "token expired");
        let msg = err.to_string();
        assert!(msg.contains("job-1"));
        assert!(msg.contains("token expired"));
    }
}
