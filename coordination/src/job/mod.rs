//! Job packets and results, the records that flow through the queue

pub mod types;

pub use types::{
    generate_job_id, validate_job_id, JobId, JobPacket, JobResult, JobStatus, QueueStatus,
    ResultStatus, DEFAULT_MAX_RETRIES, DEFAULT_MODE, DEFAULT_ROLE,
};
