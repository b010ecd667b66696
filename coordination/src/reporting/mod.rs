//! Receipts and station reports for finished jobs

pub mod receipt;
pub mod report;

pub use receipt::{ReceiptGenerator, TransferReceipt};
pub use report::{
    determine_priority, summarize, Priority, ReportGenerator, ReportType, ReportWriter, Severity,
    StationReport,
};
