//! Authorization policy
//!
//! Loaded once at startup from `<root>/ops/policy.json` and read-only
//! thereafter. A missing file is replaced with the default policy; a
//! malformed one is a fatal `PolicyLoad` error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DispatchError, DispatchResult};
use crate::persist::{read_json, write_json_atomic};

/// Upper bound for any hour count in the policy (one hundred years)
pub const MAX_POLICY_HOURS: i64 = 24 * 365 * 100;

/// How sensitive paths are compared against job targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMatch {
    /// Target contains the sensitive path anywhere
    #[default]
    Substring,
    /// Target starts with the sensitive path
    Prefix,
}

/// Process-wide authorization policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Action substrings that require an OPS token
    pub ops_required_actions: Vec<String>,

    /// Sensitive path prefixes (`~` expands to the home directory)
    pub sensitive_paths: Vec<String>,

    /// Whether secondary confirmation is globally required
    #[serde(rename = "2fa_required")]
    pub two_factor_required: bool,

    /// Token lifetime
    pub token_expiry_hours: i64,

    /// Retry ceiling applied to new packets
    pub max_retry_attempts: u32,

    /// Held jobs older than this are abandoned by an explicit sweep
    #[serde(default = "default_confirmation_window_hours")]
    pub confirmation_window_hours: i64,

    #[serde(default)]
    pub path_match: PathMatch,
}

fn default_confirmation_window_hours() -> i64 {
    72
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            ops_required_actions: [
                "modify .3ox files",
                "deploy to R:/3OX.Ai",
                "change POLICY/*",
                "modify OPS tokens",
                "change security settings",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            sensitive_paths: [
                "~/Private",
                "~/Vault",
                "~/Downloads/Encrypted",
                "~/.3ox/secure_uploads",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            two_factor_required: true,
            token_expiry_hours: 24,
            max_retry_attempts: 3,
            confirmation_window_hours: default_confirmation_window_hours(),
            path_match: PathMatch::Substring,
        }
    }
}

impl Policy {
    /// Load the policy, writing the default if none exists yet
    pub fn load_or_init(path: impl AsRef<Path>) -> DispatchResult<Self> {
        let path = path.as_ref();
        match read_json::<Policy>(path)? {
            Some(policy) => {
                policy.validate(path)?;
                Ok(policy)
            }
            None => {
                let policy = Policy::default();
                write_json_atomic(path, &policy)?;
                info!(path = %path.display(), "Wrote default OPS policy");
                Ok(policy)
            }
        }
    }

    fn validate(&self, path: &Path) -> DispatchResult<()> {
        let hours = [
            ("token_expiry_hours", self.token_expiry_hours),
            ("confirmation_window_hours", self.confirmation_window_hours),
        ];
        for (field, value) in hours {
            if value <= 0 {
                return Err(DispatchError::policy_load(
                    path,
                    format!("{} must be positive", field),
                ));
            }
            if value > MAX_POLICY_HOURS {
                return Err(DispatchError::policy_load(
                    path,
                    format!("{} must not exceed {}", field, MAX_POLICY_HOURS),
                ));
            }
        }
        Ok(())
    }

    /// Sensitive paths with `~` expanded against the given home directory
    pub fn expanded_sensitive_paths(&self, home: Option<&Path>) -> Vec<String> {
        self.sensitive_paths
            .iter()
            .map(|p| expand_home(p, home))
            .collect()
    }
}

/// Expand a leading `~` against a home directory
pub fn expand_home(path: &str, home: Option<&Path>) -> String {
    match (path.strip_prefix('~'), home) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            let mut expanded = PathBuf::from(home).to_string_lossy().into_owned();
            expanded.push_str(rest);
            expanded
        }
        _ => path.to_string(),
    }
}

/// Home directory from the environment
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_written_on_first_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ops").join("policy.json");

        let policy = Policy::load_or_init(&path).unwrap();
        assert_eq!(policy, Policy::default());
        assert!(path.exists());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"2fa_required\": true"));
        assert!(raw.contains("\"path_match\": \"substring\""));
    }

    #[test]
    fn test_existing_policy_loaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(
            &path,
            r#"{
                "ops_required_actions": ["deploy"],
                "sensitive_paths": ["/secure"],
                "2fa_required": false,
                "token_expiry_hours": 1,
                "max_retry_attempts": 5,
                "path_match": "prefix"
            }"#,
        )
        .unwrap();

        let policy = Policy::load_or_init(&path).unwrap();
        assert_eq!(policy.ops_required_actions, vec!["deploy"]);
        assert!(!policy.two_factor_required);
        assert_eq!(policy.path_match, PathMatch::Prefix);
        assert_eq!(policy.confirmation_window_hours, 72);
    }

    #[test]
    fn test_malformed_policy_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, r#"{"ops_required_actions": 3}"#).unwrap();

        let err = Policy::load_or_init(&path).unwrap_err();
        assert!(matches!(err, DispatchError::PolicyLoad { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_non_positive_ttl_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let mut policy = Policy::default();
        policy.token_expiry_hours = 0;
        std::fs::write(&path, serde_json::to_string(&policy).unwrap()).unwrap();

        assert!(Policy::load_or_init(&path).is_err());
    }

    #[test]
    fn test_oversized_hours_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");

        for (ttl, window) in [(i64::MAX, 72), (24, i64::MAX), (MAX_POLICY_HOURS + 1, 72)] {
            let policy = Policy {
                token_expiry_hours: ttl,
                confirmation_window_hours: window,
                ..Policy::default()
            };
            std::fs::write(&path, serde_json::to_string(&policy).unwrap()).unwrap();
            let err = Policy::load_or_init(&path).unwrap_err();
            assert!(matches!(err, DispatchError::PolicyLoad { .. }));
        }

        let policy = Policy {
            confirmation_window_hours: MAX_POLICY_HOURS,
            ..Policy::default()
        };
        std::fs::write(&path, serde_json::to_string(&policy).unwrap()).unwrap();
        assert!(Policy::load_or_init(&path).is_ok());
    }

    #[test]
    fn test_expand_home() {
        let home = Path::new("/home/op");
        assert_eq!(expand_home("~/Vault", Some(home)), "/home/op/Vault");
        assert_eq!(expand_home("~", Some(home)), "/home/op");
        assert_eq!(expand_home("~other/x", Some(home)), "~other/x");
        assert_eq!(expand_home("/abs", Some(home)), "/abs");
        assert_eq!(expand_home("~/Vault", None), "~/Vault");
    }
}
