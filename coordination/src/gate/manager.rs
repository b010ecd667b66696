//! OPS manager: authorization decisions over a loaded policy

use std::path::{Path, PathBuf};

use tracing::debug;

use super::policy::{expand_home, home_dir, PathMatch, Policy};
use super::redact::{redact, Redaction};
use super::tokens::{AuthToken, TokenStore, TokenVerdict};
use crate::error::DispatchResult;

/// Policy file name under the ops directory
pub const POLICY_FILE: &str = "policy.json";

/// Authorization gate
#[derive(Debug)]
pub struct OpsManager {
    policy: Policy,
    /// Policy entries as written plus their `~`-expanded forms
    sensitive_paths: Vec<String>,
    home: Option<PathBuf>,
    tokens: TokenStore,
}

impl OpsManager {
    /// Load policy and token store from an ops directory.
    ///
    /// Fails with `PolicyLoad` if either document is malformed.
    pub fn open(ops_dir: impl AsRef<Path>) -> DispatchResult<Self> {
        Self::open_with_home(ops_dir, home_dir().as_deref())
    }

    /// Open with an explicit home directory for `~` expansion
    pub fn open_with_home(ops_dir: impl AsRef<Path>, home: Option<&Path>) -> DispatchResult<Self> {
        let ops_dir = ops_dir.as_ref();
        let policy = Policy::load_or_init(ops_dir.join(POLICY_FILE))?;
        let tokens = TokenStore::open(ops_dir)?;
        Ok(Self::with_policy(policy, tokens, home))
    }

    /// Build from an already-loaded policy
    pub fn with_policy(policy: Policy, tokens: TokenStore, home: Option<&Path>) -> Self {
        let mut sensitive_paths = policy.sensitive_paths.clone();
        for expanded in policy.expanded_sensitive_paths(home) {
            if !sensitive_paths.contains(&expanded) {
                sensitive_paths.push(expanded);
            }
        }
        Self {
            policy,
            sensitive_paths,
            home: home.map(Path::to_path_buf),
            tokens,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Whether an action or any of its targets is protected by policy
    pub fn check_authorization_required<S: AsRef<str>>(&self, action: &str, targets: &[S]) -> bool {
        let action_lower = action.to_lowercase();
        if let Some(protected) = self
            .policy
            .ops_required_actions
            .iter()
            .find(|p| action_lower.contains(&p.to_lowercase()))
        {
            debug!(rule = %protected, "Action matches protected rule");
            return true;
        }
        targets.iter().any(|t| self.is_sensitive_path(t.as_ref()))
    }

    /// Whether a gated action also needs a second confirmation
    pub fn requires_secondary_confirmation<S: AsRef<str>>(&self, action: &str, targets: &[S]) -> bool {
        self.policy.two_factor_required && self.check_authorization_required(action, targets)
    }

    /// Whether a path falls under a sensitive path.
    ///
    /// A target is tested as written, `~`-expanded, and lexically normalized,
    /// so `~/Private/x` and `/home/me/Private/x` gate alike.
    pub fn is_sensitive_path(&self, path: &str) -> bool {
        let expanded = expand_home(path, self.home.as_deref());
        let candidates = [
            path.to_string(),
            normalize(path),
            normalize(&expanded),
            expanded,
        ];
        self.sensitive_paths.iter().any(|sensitive| {
            candidates.iter().any(|candidate| match self.policy.path_match {
                PathMatch::Substring => candidate.contains(sensitive.as_str()),
                PathMatch::Prefix => candidate.starts_with(sensitive.as_str()),
            })
        })
    }

    /// Issue a token; `ttl_hours` defaults to the policy TTL
    pub fn issue_token<I, S>(&self, permissions: I, ttl_hours: Option<i64>) -> DispatchResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ttl = ttl_hours.unwrap_or(self.policy.token_expiry_hours);
        self.tokens.issue_token(permissions, ttl)
    }

    /// `(valid, token)` for a token id
    pub fn validate_token(&self, token_id: &str) -> DispatchResult<(bool, Option<AuthToken>)> {
        self.tokens.validate_token(token_id)
    }

    /// Detailed token verdict
    pub fn check_token(&self, token_id: &str) -> DispatchResult<TokenVerdict> {
        self.tokens.check_token(token_id)
    }

    /// Redact sensitive content
    pub fn redact(&self, text: &str) -> Redaction {
        redact(text)
    }
}

/// Lexically collapse `.` and `..` so `~/Public/../Private` still matches
fn normalize(path: &str) -> String {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out.to_string_lossy().into_owned()
}
