//! Transfer receipts
//!
//! A receipt is the immutable audit record of a finished job. Construction is
//! deterministic given the job id, the stored result, the confirmation flag,
//! the clock, and the contents of the touched files.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::gate::redact::RedactionMark;
use crate::job::{JobId, JobResult, ResultStatus};

/// Immutable audit record of a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub job_id: JobId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub offline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
    pub files_touched: Vec<String>,
    /// Touched path -> hex SHA-256 of its contents at receipt time
    pub checksums: BTreeMap<String, String>,
    /// Files were actually modified by a successful run
    pub ops_required: bool,
    pub human_confirmed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redactions: Vec<RedactionMark>,
}

/// Builds receipts from stored results
#[derive(Debug, Clone, Default)]
pub struct ReceiptGenerator {
    /// Base for resolving relative touched paths
    base_dir: Option<PathBuf>,
}

impl ReceiptGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative touched paths against a directory
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Build a receipt at the current time
    pub fn make_receipt(&self, job_id: &str, result: &JobResult, human_confirmed: bool) -> TransferReceipt {
        self.make_receipt_at(job_id, result, human_confirmed, Utc::now())
    }

    /// Build a receipt for a fixed end time
    pub fn make_receipt_at(
        &self,
        job_id: &str,
        result: &JobResult,
        human_confirmed: bool,
        now: DateTime<Utc>,
    ) -> TransferReceipt {
        let elapsed = Duration::microseconds((result.execution_time * 1_000_000.0).round() as i64);

        let checksums = result
            .files_touched
            .iter()
            .filter_map(|path| {
                self.checksum(path)
                    .map(|digest| (path.clone(), digest))
            })
            .collect();

        TransferReceipt {
            job_id: job_id.to_string(),
            start_time: now - elapsed,
            end_time: now,
            offline: result.offline,
            connector: result.connector_used.clone(),
            cost_estimate: result.cost_estimate,
            files_touched: result.files_touched.clone(),
            checksums,
            ops_required: result.status == ResultStatus::Success && !result.files_touched.is_empty(),
            human_confirmed,
            redactions: result.redactions.clone(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Hex SHA-256 of a regular file; `None` if it cannot be read
    fn checksum(&self, path: &str) -> Option<String> {
        let resolved = self.resolve(path);
        if !resolved.is_file() {
            debug!(path, "Touched path not hashable, skipping checksum");
            return None;
        }
        let mut file = File::open(&resolved).ok()?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher).ok()?;
        Some(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_ops_required_success_with_file() {
        let result = JobResult::success("job-1", json!({})).with_files(["a.txt"]);
        let receipt = ReceiptGenerator::new().make_receipt_at("job-1", &result, false, now());
        assert!(receipt.ops_required);
    }

    #[test]
    fn test_ops_required_success_without_files() {
        let result = JobResult::success("job-1", json!({}));
        let receipt = ReceiptGenerator::new().make_receipt_at("job-1", &result, false, now());
        assert!(!receipt.ops_required);
    }

    #[test]
    fn test_ops_required_failed_with_files() {
        let result = JobResult::failed("job-1", "boom").with_files(["a", "b", "c"]);
        let receipt = ReceiptGenerator::new().make_receipt_at("job-1", &result, false, now());
        assert!(!receipt.ops_required);
    }

    #[test]
    fn test_times_and_determinism() {
        let result = JobResult::success("job-1", json!({})).with_execution_time(1.5);
        let gen = ReceiptGenerator::new();
        let a = gen.make_receipt_at("job-1", &result, true, now());
        let b = gen.make_receipt_at("job-1", &result, true, now());

        assert_eq!(a, b);
        assert_eq!(a.end_time, now());
        assert_eq!(a.end_time - a.start_time, Duration::milliseconds(1500));
        assert!(a.human_confirmed);
    }

    #[test]
    fn test_checksums_for_existing_files_only() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello").unwrap();

        let result = JobResult::success("job-1", json!({}))
            .with_files(["hello.txt", "gone.txt"]);
        let receipt = ReceiptGenerator::new()
            .with_base_dir(dir.path())
            .make_receipt_at("job-1", &result, false, now());

        assert_eq!(receipt.files_touched.len(), 2);
        assert_eq!(receipt.checksums.len(), 1);
        assert_eq!(
            receipt.checksums["hello.txt"],
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
