//! Directory-backed queue store
//!
//! State transitions are single `rename` calls between bucket directories.
//! Two concurrent renames of the same source cannot both succeed, so
//! `claim`, `hold` and `release` each let at most one caller through per id.
//! New documents are staged and published with `hard_link`, which fails if
//! the target exists; readers never observe a half-written packet.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use super::schema::{Bucket, STAGING_DIR};
use crate::error::{DispatchError, DispatchResult};
use crate::job::{validate_job_id, JobId, JobPacket, JobResult, JobStatus, QueueStatus, ResultStatus};
use crate::reporting::TransferReceipt;

/// Shared reference to QueueStore
pub type SharedQueueStore = Arc<QueueStore>;

/// File-queue store with one directory per bucket
#[derive(Debug)]
pub struct QueueStore {
    root: PathBuf,
}

impl QueueStore {
    /// Open or create a queue rooted at the given directory
    pub fn open(root: impl Into<PathBuf>) -> DispatchResult<Self> {
        let root = root.into();
        for bucket in Bucket::all() {
            fs::create_dir_all(root.join(bucket.dir_name()))?;
        }
        fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self { root })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedQueueStore {
        Arc::new(self)
    }

    /// Queue root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    // =========================================================================
    // Generic document operations
    // =========================================================================

    fn staging_path(&self, job_id: &str) -> PathBuf {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        self.root
            .join(STAGING_DIR)
            .join(format!("{}.{}.tmp", job_id, &nonce[..12]))
    }

    fn stage<T: Serialize>(&self, job_id: &str, value: &T) -> DispatchResult<PathBuf> {
        let staged = self.staging_path(job_id);
        let content = serde_json::to_string_pretty(value)?;
        fs::write(&staged, content)?;
        Ok(staged)
    }

    /// Publish a document only if no document exists at the target
    fn write_new<T: Serialize>(&self, bucket: Bucket, job_id: &str, value: &T) -> DispatchResult<bool> {
        let staged = self.stage(job_id, value)?;
        let target = bucket.path(&self.root, job_id);
        let linked = fs::hard_link(&staged, &target);
        fs::remove_file(&staged)?;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a document atomically (temp + rename)
    fn write_replace<T: Serialize>(&self, bucket: Bucket, job_id: &str, value: &T) -> DispatchResult<()> {
        let staged = self.stage(job_id, value)?;
        let target = bucket.path(&self.root, job_id);
        if let Err(e) = fs::rename(&staged, &target) {
            let _ = fs::remove_file(&staged);
            return Err(e.into());
        }
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, bucket: Bucket, job_id: &str) -> DispatchResult<Option<T>> {
        let path = bucket.path(&self.root, job_id);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, bucket: Bucket, job_id: &str) -> bool {
        bucket.path(&self.root, job_id).exists()
    }

    /// Move a packet between buckets; the sole serialization point per id
    fn transition(&self, job_id: &str, from: Bucket, to: Bucket, status: JobStatus) -> DispatchResult<JobPacket> {
        validate_job_id(job_id)?;
        let source = from.path(&self.root, job_id);
        let target = to.path(&self.root, job_id);

        match fs::rename(&source, &target) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DispatchError::not_found(job_id, from.dir_name()));
            }
            Err(e) => return Err(e.into()),
        }

        let mut packet: JobPacket = self
            .read(to, job_id)?
            .ok_or_else(|| DispatchError::not_found(job_id, to.dir_name()))?;
        packet.status = status;
        debug!(job_id, from = %from, to = %to, "Job moved");
        Ok(packet)
    }

    /// List job ids in a bucket, sorted (ids are time-prefixed)
    pub fn list(&self, bucket: Bucket) -> DispatchResult<Vec<JobId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(bucket.dir_name()))? {
            let entry = entry?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| bucket.job_id_from_file_name(name))
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    // =========================================================================
    // Packet operations
    // =========================================================================

    /// Persist a packet in the New bucket
    pub fn submit(&self, packet: &JobPacket) -> DispatchResult<JobId> {
        validate_job_id(&packet.id)?;

        let taken = Bucket::packet_buckets()
            .iter()
            .chain(std::iter::once(&Bucket::Results))
            .any(|bucket| self.exists(*bucket, &packet.id));
        if taken {
            return Err(DispatchError::duplicate(&packet.id));
        }

        let mut stored = packet.clone();
        stored.status = JobStatus::New;
        if !self.write_new(Bucket::New, &packet.id, &stored)? {
            return Err(DispatchError::duplicate(&packet.id));
        }

        info!(job_id = %packet.id, "Job submitted");
        Ok(packet.id.clone())
    }

    /// Atomically move a packet from New to Claimed
    pub fn claim(&self, job_id: &str) -> DispatchResult<JobPacket> {
        let packet = self.transition(job_id, Bucket::New, Bucket::Claimed, JobStatus::Claimed)?;
        info!(job_id, "Job claimed");
        Ok(packet)
    }

    /// Atomically move a packet from New to Held (awaiting confirmation)
    pub fn hold(&self, job_id: &str) -> DispatchResult<JobPacket> {
        let packet = self.transition(
            job_id,
            Bucket::New,
            Bucket::Held,
            JobStatus::RequiresConfirmation,
        )?;
        info!(job_id, "Job held for confirmation");
        Ok(packet)
    }

    /// Atomically move a confirmed packet from Held to Claimed
    pub fn release(&self, job_id: &str) -> DispatchResult<JobPacket> {
        let packet = self.transition(job_id, Bucket::Held, Bucket::Claimed, JobStatus::Claimed)?;
        info!(job_id, "Held job released");
        Ok(packet)
    }

    /// Read a packet without moving it
    pub fn peek(&self, bucket: Bucket, job_id: &str) -> DispatchResult<JobPacket> {
        validate_job_id(job_id)?;
        self.read(bucket, job_id)?
            .ok_or_else(|| DispatchError::not_found(job_id, bucket.dir_name()))
    }

    /// Rewrite a packet the caller has claimed
    pub fn update_claimed(&self, packet: &JobPacket) -> DispatchResult<()> {
        validate_job_id(&packet.id)?;
        if !self.exists(Bucket::Claimed, &packet.id) {
            return Err(DispatchError::not_found(&packet.id, Bucket::Claimed.dir_name()));
        }
        self.write_replace(Bucket::Claimed, &packet.id, packet)
    }

    // =========================================================================
    // Result operations
    // =========================================================================

    /// Write a job result; a later call for the same id replaces it
    pub fn store_result(&self, job_id: &str, result: &JobResult) -> DispatchResult<()> {
        validate_job_id(job_id)?;
        self.write_replace(Bucket::Results, job_id, result)?;
        info!(job_id, status = %result.status, "Job result stored");
        Ok(())
    }

    /// Read a job result
    pub fn get_result(&self, job_id: &str) -> DispatchResult<JobResult> {
        validate_job_id(job_id)?;
        self.read(Bucket::Results, job_id)?
            .ok_or_else(|| DispatchError::not_found(job_id, Bucket::Results.dir_name()))
    }

    // =========================================================================
    // Receipt operations
    // =========================================================================

    /// Write a receipt; receipts are never overwritten
    pub fn store_receipt(&self, receipt: &TransferReceipt) -> DispatchResult<()> {
        validate_job_id(&receipt.job_id)?;
        if !self.write_new(Bucket::Receipts, &receipt.job_id, receipt)? {
            return Err(DispatchError::ReceiptExists {
                job_id: receipt.job_id.clone(),
            });
        }
        info!(job_id = %receipt.job_id, "Transfer receipt written");
        Ok(())
    }

    /// Read a receipt
    pub fn get_receipt(&self, job_id: &str) -> DispatchResult<TransferReceipt> {
        validate_job_id(job_id)?;
        self.read(Bucket::Receipts, job_id)?
            .ok_or_else(|| DispatchError::not_found(job_id, Bucket::Receipts.dir_name()))
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Derive a job's status from the bucket that holds it
    pub fn current_status(&self, job_id: &str) -> DispatchResult<QueueStatus> {
        validate_job_id(job_id)?;

        if let Some(result) = self.read::<JobResult>(Bucket::Results, job_id)? {
            return Ok(match result.status {
                ResultStatus::Failed => QueueStatus::Failed,
                ResultStatus::Success | ResultStatus::Partial => QueueStatus::Completed,
            });
        }
        if self.exists(Bucket::Claimed, job_id) {
            return Ok(QueueStatus::Processing);
        }
        if self.exists(Bucket::Held, job_id) {
            return Ok(QueueStatus::RequiresConfirmation);
        }
        if self.exists(Bucket::New, job_id) {
            return Ok(QueueStatus::Queued);
        }
        Ok(QueueStatus::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn test_store() -> (QueueStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = QueueStore::open(dir.path().join("queue")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_submit_creates_new_document() {
        let (store, _dir) = test_store();
        let packet = JobPacket::new("organize downloads");

        let id = store.submit(&packet).unwrap();

        assert_eq!(id, packet.id);
        assert_eq!(store.current_status(&id).unwrap(), QueueStatus::Queued);
        assert_eq!(store.list(Bucket::New).unwrap(), vec![id.clone()]);
        assert_eq!(store.peek(Bucket::New, &id).unwrap().prompt, "organize downloads");
    }

    #[test]
    fn test_duplicate_submit_rejected() {
        let (store, _dir) = test_store();
        let packet = JobPacket::new("x");
        store.submit(&packet).unwrap();

        let err = store.submit(&packet).unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateId { .. }));
    }

    #[test]
    fn test_duplicate_submit_rejected_after_claim() {
        let (store, _dir) = test_store();
        let packet = JobPacket::new("x");
        store.submit(&packet).unwrap();
        store.claim(&packet.id).unwrap();

        let err = store.submit(&packet).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_ID");
    }

    #[test]
    fn test_claim_moves_packet() {
        let (store, _dir) = test_store();
        let packet = JobPacket::new("x");
        store.submit(&packet).unwrap();

        let claimed = store.claim(&packet.id).unwrap();
        assert_eq!(claimed.id, packet.id);
        assert_eq!(claimed.status, JobStatus::Claimed);
        assert_eq!(store.current_status(&packet.id).unwrap(), QueueStatus::Processing);
        assert!(store.list(Bucket::New).unwrap().is_empty());
    }

    #[test]
    fn test_second_claim_is_not_found() {
        let (store, _dir) = test_store();
        let packet = JobPacket::new("x");
        store.submit(&packet).unwrap();

        store.claim(&packet.id).unwrap();
        let err = store.claim(&packet.id).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_claim_unknown_is_not_found() {
        let (store, _dir) = test_store();
        assert!(store.claim("job-never-submitted").unwrap_err().is_not_found());
    }

    #[test]
    fn test_hold_and_release() {
        let (store, _dir) = test_store();
        let packet = JobPacket::new("x");
        store.submit(&packet).unwrap();

        let held = store.hold(&packet.id).unwrap();
        assert_eq!(held.status, JobStatus::RequiresConfirmation);
        assert_eq!(
            store.current_status(&packet.id).unwrap(),
            QueueStatus::RequiresConfirmation
        );
        assert!(store.claim(&packet.id).unwrap_err().is_not_found());

        store.release(&packet.id).unwrap();
        assert_eq!(store.current_status(&packet.id).unwrap(), QueueStatus::Processing);
        assert!(store.release(&packet.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_status_follows_result_status() {
        let (store, _dir) = test_store();
        let packet = JobPacket::new("x");
        store.submit(&packet).unwrap();
        store.claim(&packet.id).unwrap();

        store
            .store_result(&packet.id, &JobResult::failed(&packet.id, "boom"))
            .unwrap();
        assert_eq!(store.current_status(&packet.id).unwrap(), QueueStatus::Failed);

        store
            .store_result(&packet.id, &JobResult::success(&packet.id, json!({})))
            .unwrap();
        assert_eq!(store.current_status(&packet.id).unwrap(), QueueStatus::Completed);
    }

    #[test]
    fn test_store_result_overwrites() {
        let (store, _dir) = test_store();
        store
            .store_result("job-1", &JobResult::failed("job-1", "first"))
            .unwrap();
        store
            .store_result("job-1", &JobResult::failed("job-1", "second"))
            .unwrap();

        assert_eq!(store.list(Bucket::Results).unwrap().len(), 1);
        let result = store.get_result("job-1").unwrap();
        assert_eq!(result.error_message.as_deref(), Some("second"));
    }

    #[test]
    fn test_get_result_missing() {
        let (store, _dir) = test_store();
        assert!(store.get_result("job-1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_claimed_requires_claim() {
        let (store, _dir) = test_store();
        let mut packet = JobPacket::new("x");
        store.submit(&packet).unwrap();
        assert!(store.update_claimed(&packet).unwrap_err().is_not_found());

        store.claim(&packet.id).unwrap();
        packet.human_confirmed = true;
        store.update_claimed(&packet).unwrap();
        assert!(store.peek(Bucket::Claimed, &packet.id).unwrap().human_confirmed);
    }

    #[test]
    fn test_unknown_status_and_invalid_id() {
        let (store, _dir) = test_store();
        assert_eq!(store.current_status("job-none").unwrap(), QueueStatus::NotFound);
        assert!(matches!(
            store.current_status("../escape").unwrap_err(),
            DispatchError::InvalidJobId { .. }
        ));
    }

    #[test]
    fn test_staging_is_left_clean() {
        let (store, _dir) = test_store();
        store.submit(&JobPacket::new("x")).unwrap();
        store
            .store_result("job-1", &JobResult::failed("job-1", "x"))
            .unwrap();
        let staged = fs::read_dir(store.root().join(STAGING_DIR)).unwrap().count();
        assert_eq!(staged, 0);
    }
}
