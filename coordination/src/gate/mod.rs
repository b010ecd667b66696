//! Authorization gate (OPS manager)
//!
//! Decides whether a job may run without a human in the loop, issues and
//! validates signed OPS tokens, and redacts sensitive content before it
//! leaves the machine.

pub mod manager;
pub mod policy;
pub mod redact;
pub mod tokens;

pub use manager::OpsManager;
pub use policy::{PathMatch, Policy};
pub use redact::{redact, Redaction, RedactionEntry, RedactionMark, RedactionPattern};
pub use tokens::{AuthToken, TokenStore, TokenVerdict, PERMISSION_ALL, PERMISSION_OPS_ACTION};
