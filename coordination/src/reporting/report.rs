//! Station reports
//!
//! Human-facing summaries of finished jobs, written as YAML documents under
//! `<root>/reports/<id>.<type>.yaml` for a downstream listener.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::DispatchResult;
use crate::job::{JobId, JobResult, ResultStatus};

/// Fixed stratos tag in every report header
pub const STRATOS: &str = "STRATOS-1";

/// Default station name
pub const DEFAULT_STATION: &str = "RVNx.BASE";

/// Default report destination
pub const DEFAULT_DESTINATION: &str = "CMD.BRIDGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Status,
    Incident,
    Change,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Incident => "incident",
            Self::Change => "change",
        }
    }
}

impl std::fmt::Display for ReportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportHeader {
    pub stratos: String,
    pub station: String,
    pub timestamp: DateTime<Utc>,
    /// Compact calendar stamp, `⧗-YY.DDD`
    pub sirius_time: String,
    #[serde(rename = "type")]
    pub kind: ReportType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub job_id: JobId,
    /// `completed`, `failed` or `change_detected`
    pub result: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_touched: Vec<String>,
    pub execution_time: f64,
    pub offline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRouting {
    pub priority: Priority,
    pub destination: String,
}

/// A station report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationReport {
    pub header: ReportHeader,
    pub payload: ReportPayload,
    pub routing: ReportRouting,
}

impl StationReport {
    pub fn kind(&self) -> ReportType {
        self.header.kind
    }

    pub fn job_id(&self) -> &str {
        &self.payload.job_id
    }
}

/// `⧗-YY.DDD` stamp (years since 2000, day of year)
pub fn sirius_time(at: DateTime<Utc>) -> String {
    format!("⧗-{}.{:03}", at.year() - 2000, at.ordinal())
}

/// Priority from touched-file count and cost
pub fn determine_priority(files_touched: usize, cost_estimate: f64) -> Priority {
    if files_touched > 100 || cost_estimate > 0.50 {
        Priority::High
    } else if files_touched > 10 || cost_estimate > 0.10 {
        Priority::Medium
    } else {
        Priority::Normal
    }
}

fn len_of(data: &Value, key: &str) -> usize {
    match data.get(key) {
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(map)) => map.len(),
        _ => 0,
    }
}

/// One-line summary keyed off the action in the result payload
pub fn summarize(result: &JobResult) -> String {
    let data = &result.result_data;
    match result.action() {
        "organize" => {
            let categories = data.get("categories").and_then(Value::as_object);
            let total: usize = categories
                .map(|c| {
                    c.values()
                        .map(|files| files.as_array().map_or(0, Vec::len))
                        .sum()
                })
                .unwrap_or(0);
            let count = categories.map_or(0, |c| c.len());
            format!("Organized {} files into {} categories", total, count)
        }
        "summarize" => format!("Summarized {} documents", len_of(data, "summaries")),
        "clean" => format!("Cleaned {} temporary files", len_of(data, "cleaned_files")),
        "duplicate" => format!("Found {} duplicate files", len_of(data, "duplicates")),
        action => {
            let processed = data
                .get("files_processed")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            format!("Processed {} items using {}", processed, action)
        }
    }
}

/// Builds station reports
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    station: String,
    destination: String,
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_STATION, DEFAULT_DESTINATION)
    }
}

impl ReportGenerator {
    pub fn new(station: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            station: station.into(),
            destination: destination.into(),
        }
    }

    fn header(&self, kind: ReportType, now: DateTime<Utc>) -> ReportHeader {
        ReportHeader {
            stratos: STRATOS.to_string(),
            station: self.station.clone(),
            timestamp: now,
            sirius_time: sirius_time(now),
            kind,
        }
    }

    fn base_payload(job_id: &str, result: &JobResult, outcome: &str, summary: String) -> ReportPayload {
        ReportPayload {
            job_id: job_id.to_string(),
            result: outcome.to_string(),
            summary,
            files_touched: result.files_touched.clone(),
            execution_time: result.execution_time,
            offline: result.offline,
            connector_used: result.connector_used.clone(),
            cost_estimate: result.cost_estimate,
            error_message: None,
            severity: None,
        }
    }

    /// Status report for a job result
    pub fn make_report(&self, job_id: &str, result: &JobResult) -> StationReport {
        self.make_report_at(job_id, result, Utc::now())
    }

    pub fn make_report_at(&self, job_id: &str, result: &JobResult, now: DateTime<Utc>) -> StationReport {
        StationReport {
            header: self.header(ReportType::Status, now),
            payload: Self::base_payload(job_id, result, "completed", summarize(result)),
            routing: ReportRouting {
                priority: determine_priority(
                    result.files_touched.len(),
                    result.cost_estimate.unwrap_or(0.0),
                ),
                destination: self.destination.clone(),
            },
        }
    }

    /// Incident report for a failed job
    pub fn make_incident_report(&self, job_id: &str, result: &JobResult, severity: Severity) -> StationReport {
        self.make_incident_report_at(job_id, result, severity, Utc::now())
    }

    pub fn make_incident_report_at(
        &self,
        job_id: &str,
        result: &JobResult,
        severity: Severity,
        now: DateTime<Utc>,
    ) -> StationReport {
        let error = result
            .error_message
            .clone()
            .unwrap_or_else(|| "unknown error".to_string());
        let mut payload = Self::base_payload(
            job_id,
            result,
            "failed",
            format!("Job {} failed: {}", job_id, error),
        );
        payload.error_message = Some(error);
        payload.severity = Some(severity);

        StationReport {
            header: self.header(ReportType::Incident, now),
            payload,
            routing: ReportRouting {
                priority: if severity >= Severity::High {
                    Priority::High
                } else {
                    Priority::Normal
                },
                destination: self.destination.clone(),
            },
        }
    }

    /// Change report for an OPS-gated job that modified files
    pub fn make_change_report_at(&self, job_id: &str, result: &JobResult, now: DateTime<Utc>) -> StationReport {
        StationReport {
            header: self.header(ReportType::Change, now),
            payload: Self::base_payload(
                job_id,
                result,
                "change_detected",
                format!("Operational changes detected in job {}", job_id),
            ),
            routing: ReportRouting {
                priority: Priority::High,
                destination: self.destination.clone(),
            },
        }
    }

    /// Reports for a finished job: an incident for FAILED, otherwise a status
    /// report, plus a change report when an OPS-gated job touched files
    pub fn reports_for(&self, job_id: &str, result: &JobResult, ops_action: bool) -> Vec<StationReport> {
        let now = Utc::now();
        if result.status == ResultStatus::Failed {
            return vec![self.make_incident_report_at(job_id, result, Severity::High, now)];
        }
        let mut reports = vec![self.make_report_at(job_id, result, now)];
        if ops_action && !result.files_touched.is_empty() {
            reports.push(self.make_change_report_at(job_id, result, now));
        }
        reports
    }
}

/// Writes reports as YAML documents
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn open(dir: impl Into<PathBuf>) -> DispatchResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a report is written to
    pub fn path_for(&self, job_id: &str, kind: ReportType) -> PathBuf {
        self.dir.join(format!("{}.{}.yaml", job_id, kind))
    }

    /// Write a report, replacing an earlier one of the same type
    pub fn write(&self, report: &StationReport) -> DispatchResult<PathBuf> {
        let path = self.path_for(report.job_id(), report.kind());
        let temp_path = path.with_extension("yaml.tmp");
        std::fs::write(&temp_path, serde_yaml::to_string(report)?)?;
        std::fs::rename(&temp_path, &path)?;
        info!(job_id = %report.job_id(), kind = %report.kind(), "Station report written");
        Ok(path)
    }

    /// Read a report back
    pub fn read(&self, job_id: &str, kind: ReportType) -> DispatchResult<StationReport> {
        let content = std::fs::read_to_string(self.path_for(job_id, kind))?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_priority_thresholds() {
        assert_eq!(determine_priority(0, 0.0), Priority::Normal);
        assert_eq!(determine_priority(10, 0.10), Priority::Normal);
        assert_eq!(determine_priority(11, 0.0), Priority::Medium);
        assert_eq!(determine_priority(0, 0.11), Priority::Medium);
        assert_eq!(determine_priority(101, 0.0), Priority::High);
        assert_eq!(determine_priority(0, 0.51), Priority::High);
    }

    #[test]
    fn test_summaries_by_action() {
        let organize = JobResult::success(
            "j",
            json!({"action": "organize", "categories": {"docs": ["a", "b"], "img": ["c"]}}),
        );
        assert_eq!(summarize(&organize), "Organized 3 files into 2 categories");

        let clean = JobResult::success("j", json!({"action": "clean", "cleaned_files": ["x"]}));
        assert_eq!(summarize(&clean), "Cleaned 1 temporary files");

        let dup = JobResult::success("j", json!({"action": "duplicate", "duplicates": []}));
        assert_eq!(summarize(&dup), "Found 0 duplicate files");

        let other = JobResult::success("j", json!({"action": "audit", "files_processed": 7}));
        assert_eq!(summarize(&other), "Processed 7 items using audit");

        let bare = JobResult::success("j", json!({}));
        assert_eq!(summarize(&bare), "Processed 0 items using process");
    }

    #[test]
    fn test_incident_for_failure() {
        let gen = ReportGenerator::default();
        let failed = JobResult::failed("job-1", "disk full");
        let reports = gen.reports_for("job-1", &failed, false);

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.kind(), ReportType::Incident);
        assert_eq!(report.routing.priority, Priority::High);
        assert_eq!(report.payload.summary, "Job job-1 failed: disk full");
        assert_eq!(report.routing.destination, DEFAULT_DESTINATION);
    }

    #[test]
    fn test_change_report_for_gated_job() {
        let gen = ReportGenerator::default();
        let ok = JobResult::success("job-1", json!({})).with_files(["a"]);
        let kinds: Vec<_> = gen
            .reports_for("job-1", &ok, true)
            .iter()
            .map(StationReport::kind)
            .collect();
        assert_eq!(kinds, vec![ReportType::Status, ReportType::Change]);
    }

    #[test]
    fn test_sirius_time() {
        let at = Utc.with_ymd_and_hms(2025, 4, 18, 0, 0, 0).unwrap();
        assert_eq!(sirius_time(at), "⧗-25.108");
    }

    #[test]
    fn test_write_and_read_yaml() {
        let dir = tempdir().unwrap();
        let writer = ReportWriter::open(dir.path().join("reports")).unwrap();
        let report = ReportGenerator::new("SYNTH.BASE", "CMD.BRIDGE")
            .make_report("job-1", &JobResult::success("job-1", json!({})));

        let path = writer.write(&report).unwrap();
        assert!(path.ends_with("job-1.status.yaml"));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("stratos: STRATOS-1"));
        assert!(raw.contains("type: status"));

        assert_eq!(writer.read("job-1", ReportType::Status).unwrap(), report);
    }
}
