//! Durable file queue for job packets
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   new/       <id>.job.json       submitted, not yet gated
//!   held/      <id>.job.json       REQUIRES_CONFIRMATION
//!   claimed/   <id>.job.json       claimed by a worker
//!   results/   <id>.result.json    one result per job (replace on retry)
//!   receipts/  <id>.receipt.json   create-only audit receipts
//!   .staging/                      temp files for atomic publication
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use job_coordination::queue::QueueStore;
//! use job_coordination::job::JobPacket;
//!
//! let store = QueueStore::open(".dispatch/queue")?;
//! let id = store.submit(&JobPacket::new("organize downloads"))?;
//! let packet = store.claim(&id)?; // at most one caller succeeds
//! ```

pub mod schema;
pub mod store;

pub use schema::Bucket;
pub use store::{QueueStore, SharedQueueStore};
