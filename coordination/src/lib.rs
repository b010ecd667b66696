//! Job Coordination Library
//!
//! Single-node, file-queue-backed job dispatch core.
//!
//! This library provides:
//! - Job packets and results with time-sortable ids
//! - A directory-backed queue whose bucket layout is the job status
//! - An OPS authorization gate with signed tokens and content redaction
//! - A routing brain that picks an agent persona from workspace context
//! - A dispatcher with bounded, fault-isolated executor calls and a spend ledger
//! - Immutable transfer receipts and YAML station reports
//!
//! # Lifecycle
//!
//! ```text
//! submit ─► NEW ─► (gate) ─► REQUIRES_CONFIRMATION ─► confirm ─┐
//!                    │                                          ▼
//!                    └──────────────────────────────────────► CLAIMED ─► dispatch ─► RESULT ─► RECEIPT
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use job_coordination::{DispatchConfig, ExecutorRegistry, JobPacket, Pipeline};
//!
//! let config = DispatchConfig::load(None)?;
//! let pipeline = Pipeline::open(&config, ExecutorRegistry::new().with(my_offline_executor))?;
//! let id = pipeline.submit(JobPacket::new("organize downloads"))?;
//! let outcome = pipeline.process(&id).await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod job;
pub(crate) mod persist;
pub mod pipeline;
pub mod queue;
pub mod reporting;
pub mod router;

pub use config::DispatchConfig;
pub use dispatcher::{
    Dispatcher, DispatcherConfig, Executor, ExecutorOutput, ExecutorRegistry, HttpExecutor,
    OFFLINE_EXECUTOR,
};
pub use error::{DispatchError, DispatchResult};
pub use gate::{OpsManager, Policy};
pub use job::{JobId, JobPacket, JobResult, JobStatus, QueueStatus, ResultStatus};
pub use pipeline::{Confirmation, HoldReason, JobOutcome, Pipeline};
pub use queue::{Bucket, QueueStore};
pub use reporting::{ReceiptGenerator, StationReport, TransferReceipt};
pub use router::{Connector, Persona, RoutingBrain, RoutingContext};
