//! Bucket definitions for the file queue
//!
//! Each bucket is a directory under the queue root holding one JSON document
//! per job, named by the job id. A job's status is derived from which bucket
//! holds it, never from a stored flag.

use std::path::{Path, PathBuf};

/// Pending jobs, not yet evaluated by the gate
pub const BUCKET_NEW: &str = "new";

/// Jobs frozen by the authorization gate awaiting confirmation
pub const BUCKET_HELD: &str = "held";

/// Jobs claimed by a worker
pub const BUCKET_CLAIMED: &str = "claimed";

/// Job results
pub const BUCKET_RESULTS: &str = "results";

/// Immutable transfer receipts
pub const BUCKET_RECEIPTS: &str = "receipts";

/// Scratch space for atomic writes (same filesystem as the buckets)
pub const STAGING_DIR: &str = ".staging";

/// A logical queue bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    New,
    Held,
    Claimed,
    Results,
    Receipts,
}

impl Bucket {
    /// All buckets, in lifecycle order
    pub fn all() -> &'static [Bucket] {
        &[
            Self::New,
            Self::Held,
            Self::Claimed,
            Self::Results,
            Self::Receipts,
        ]
    }

    /// Buckets that hold a packet document
    pub fn packet_buckets() -> &'static [Bucket] {
        &[Self::New, Self::Held, Self::Claimed]
    }

    /// Directory name under the queue root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::New => BUCKET_NEW,
            Self::Held => BUCKET_HELD,
            Self::Claimed => BUCKET_CLAIMED,
            Self::Results => BUCKET_RESULTS,
            Self::Receipts => BUCKET_RECEIPTS,
        }
    }

    /// Document suffix for this bucket
    fn suffix(&self) -> &'static str {
        match self {
            Self::New | Self::Held | Self::Claimed => ".job.json",
            Self::Results => ".result.json",
            Self::Receipts => ".receipt.json",
        }
    }

    /// Document file name for a job id
    pub fn file_name(&self, job_id: &str) -> String {
        format!("{}{}", job_id, self.suffix())
    }

    /// Full document path for a job id
    pub fn path(&self, root: &Path, job_id: &str) -> PathBuf {
        root.join(self.dir_name()).join(self.file_name(job_id))
    }

    /// Parse a job id back out of a document file name
    pub fn job_id_from_file_name(&self, file_name: &str) -> Option<String> {
        file_name
            .strip_suffix(self.suffix())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}
