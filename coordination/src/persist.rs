//! JSON document persistence shared by the gate and the spend ledger
//!
//! Writes go to a sibling temp file that is then renamed over the target, so
//! a crash never leaves a torn document behind.

use std::io::ErrorKind;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Write a value as pretty JSON via temp + rename
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> DispatchResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(&temp_path, &content)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Read a JSON document; `Ok(None)` if the file does not exist.
///
/// Parse failures are reported as `PolicyLoad`, since every caller reads a
/// store that must be intact before the process can serve jobs.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> DispatchResult<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| DispatchError::policy_load(path, e.to_string()))
}
