//! OPS authorization tokens
//!
//! Tokens live in `<root>/ops/tokens.json`. Each carries an HMAC-SHA256
//! signature over its other fields, keyed by a per-installation secret in
//! `<root>/ops/ops.key`. All access to the token set goes through one mutex,
//! and every change is written back with temp + rename.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info};

use crate::error::{DispatchError, DispatchResult};
use crate::persist::{read_json, write_json_atomic};

type HmacSha256 = Hmac<Sha256>;

/// Token store file name under the ops directory
pub const TOKENS_FILE: &str = "tokens.json";

/// Signing key file name under the ops directory
pub const KEY_FILE: &str = "ops.key";

/// Wildcard permission
pub const PERMISSION_ALL: &str = "ALL";

/// Permission that releases OPS-gated jobs
pub const PERMISSION_OPS_ACTION: &str = "ops_action";

const KEY_BYTES: usize = 32;
const TOKEN_ID_BYTES: usize = 32;

/// A signed authorization token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    #[serde(skip)]
    pub token_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub permissions: BTreeSet<String>,
    /// Hex HMAC-SHA256 over id, timestamps and permissions
    pub signature: String,
}

impl AuthToken {
    /// Whether the token grants a permission (directly or via `ALL`)
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(PERMISSION_ALL) || self.permissions.contains(permission)
    }

    /// Whether the token has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn signing_payload(&self) -> String {
        let permissions: Vec<&str> = self.permissions.iter().map(String::as_str).collect();
        format!(
            "{}:{}:{}:{}",
            self.token_id,
            self.created_at.to_rfc3339(),
            self.expires_at.to_rfc3339(),
            permissions.join(",")
        )
    }
}

/// Why a token check failed, or the token it validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenVerdict {
    Valid(AuthToken),
    Unknown,
    Tampered(AuthToken),
    Expired(AuthToken),
}

impl TokenVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Human-readable reason for a rejected token
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Valid(_) => "valid",
            Self::Unknown => "unknown token",
            Self::Tampered(_) => "token signature mismatch",
            Self::Expired(_) => "token expired",
        }
    }

    /// Split into the `(valid, token)` pair callers usually want
    pub fn into_parts(self) -> (bool, Option<AuthToken>) {
        match self {
            Self::Valid(token) => (true, Some(token)),
            Self::Unknown => (false, None),
            Self::Tampered(token) | Self::Expired(token) => (false, Some(token)),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenSet {
    tokens: BTreeMap<String, AuthToken>,
}

/// Persistent, signed token set
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    key: Vec<u8>,
    lock: Mutex<()>,
}

impl TokenStore {
    /// Open the token store in an ops directory, creating the key if needed.
    ///
    /// A malformed token file or key is a `PolicyLoad` error.
    pub fn open(ops_dir: impl AsRef<Path>) -> DispatchResult<Self> {
        let ops_dir = ops_dir.as_ref();
        std::fs::create_dir_all(ops_dir)?;

        let key = load_or_create_key(&ops_dir.join(KEY_FILE))?;
        let path = ops_dir.join(TOKENS_FILE);
        // Fail at startup, not on the first gated job
        read_json::<TokenSet>(&path)?;

        Ok(Self {
            path,
            key,
            lock: Mutex::new(()),
        })
    }

    fn sign(&self, token: &AuthToken) -> DispatchResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| DispatchError::policy_load(&self.path, e.to_string()))?;
        mac.update(token.signing_payload().as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signature_matches(&self, token: &AuthToken) -> bool {
        let Ok(expected) = hex::decode(&token.signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(token.signing_payload().as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    fn load(&self) -> DispatchResult<TokenSet> {
        let mut set = read_json::<TokenSet>(&self.path)?.unwrap_or_default();
        for (id, token) in set.tokens.iter_mut() {
            token.token_id = id.clone();
        }
        Ok(set)
    }

    /// Issue a token valid for `ttl_hours` from now
    pub fn issue_token<I, S>(&self, permissions: I, ttl_hours: i64) -> DispatchResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue_token_at(permissions, ttl_hours, Utc::now())
    }

    /// Issue a token relative to a fixed instant.
    ///
    /// A negative TTL produces a token that is already expired. A TTL whose
    /// expiry falls outside the representable time range is a config error.
    pub fn issue_token_at<I, S>(
        &self,
        permissions: I,
        ttl_hours: i64,
        now: DateTime<Utc>,
    ) -> DispatchResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let expires_at = Duration::try_hours(ttl_hours)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                DispatchError::config(format!("token TTL of {} hours is out of range", ttl_hours))
            })?;

        let mut id_bytes = [0u8; TOKEN_ID_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut id_bytes);

        let mut token = AuthToken {
            token_id: hex::encode(id_bytes),
            created_at: now,
            expires_at,
            permissions: permissions.into_iter().map(Into::into).collect(),
            signature: String::new(),
        };
        token.signature = self.sign(&token)?;

        let _guard = self
            .lock
            .lock()
            .map_err(|_| DispatchError::config("token store lock poisoned"))?;
        let mut set = self.load()?;
        set.tokens.insert(token.token_id.clone(), token.clone());
        write_json_atomic(&self.path, &set)?;

        info!(
            expires_at = %token.expires_at,
            permissions = ?token.permissions,
            "OPS token issued"
        );
        Ok(token.token_id)
    }

    /// Check a token at the current time
    pub fn check_token(&self, token_id: &str) -> DispatchResult<TokenVerdict> {
        self.check_token_at(token_id, Utc::now())
    }

    /// Check a token at a fixed instant
    pub fn check_token_at(&self, token_id: &str, now: DateTime<Utc>) -> DispatchResult<TokenVerdict> {
        let set = {
            let _guard = self
                .lock
                .lock()
                .map_err(|_| DispatchError::config("token store lock poisoned"))?;
            self.load()?
        };

        let Some(token) = set.tokens.get(token_id).cloned() else {
            debug!("Token lookup miss");
            return Ok(TokenVerdict::Unknown);
        };
        if !self.signature_matches(&token) {
            return Ok(TokenVerdict::Tampered(token));
        }
        if token.is_expired_at(now) {
            return Ok(TokenVerdict::Expired(token));
        }
        Ok(TokenVerdict::Valid(token))
    }

    /// `(valid, token)` for a token id
    pub fn validate_token(&self, token_id: &str) -> DispatchResult<(bool, Option<AuthToken>)> {
        Ok(self.check_token(token_id)?.into_parts())
    }
}

fn load_or_create_key(path: &Path) -> DispatchResult<Vec<u8>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let key = hex::decode(content.trim())
                .map_err(|e| DispatchError::policy_load(path, format!("invalid key: {}", e)))?;
            if key.len() < KEY_BYTES {
                return Err(DispatchError::policy_load(path, "key too short"));
            }
            Ok(key)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut key = vec![0u8; KEY_BYTES];
            rand::rngs::OsRng.fill_bytes(&mut key);
            std::fs::write(path, hex::encode(&key))?;
            restrict_permissions(path)?;
            info!(path = %path.display(), "Generated OPS signing key");
            Ok(key)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> DispatchResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> DispatchResult<()> {
    Ok(())
}
