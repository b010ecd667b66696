//! Sensitive content redaction
//!
//! Fixed pattern classes are applied in priority order. All classes match
//! against the original text; when two matches overlap, the earlier class
//! wins and the later match is dropped. Every kept match is replaced with
//! [`REDACTION_PLACEHOLDER`].

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Replacement text for every redacted span
pub const REDACTION_PLACEHOLDER: &str = "[REDACTED]";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("EMAIL_RE regex should compile")
});

static SSN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("SSN_RE regex should compile"));

static CREDIT_CARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b")
        .expect("CREDIT_CARD_RE regex should compile")
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").expect("PHONE_RE regex should compile")
});

/// A class of sensitive content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionPattern {
    Email,
    Ssn,
    CreditCard,
    Phone,
}

impl RedactionPattern {
    /// All patterns, in priority order
    pub fn all() -> &'static [RedactionPattern] {
        &[Self::Email, Self::Ssn, Self::CreditCard, Self::Phone]
    }

    /// Stable pattern name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Ssn => "ssn",
            Self::CreditCard => "credit_card",
            Self::Phone => "phone",
        }
    }

    fn regex(&self) -> &'static Regex {
        match self {
            Self::Email => &EMAIL_RE,
            Self::Ssn => &SSN_RE,
            Self::CreditCard => &CREDIT_CARD_RE,
            Self::Phone => &PHONE_RE,
        }
    }
}

impl std::fmt::Display for RedactionPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One redaction, including the original value.
///
/// Entries hold unredacted content. Callers must not persist or log them;
/// use [`RedactionEntry::mark`] for anything that leaves memory.
#[derive(Debug, Clone, PartialEq)]
pub struct RedactionEntry {
    pub pattern: RedactionPattern,
    /// Byte span in the original text
    pub start: usize,
    pub end: usize,
    pub original: String,
    pub timestamp: DateTime<Utc>,
}

impl RedactionEntry {
    /// Sanitized copy without the original value
    pub fn mark(&self) -> RedactionMark {
        RedactionMark {
            pattern: self.pattern,
            start: self.start,
            end: self.end,
        }
    }
}

/// Sanitized record of a redaction, safe to persist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionMark {
    pub pattern: RedactionPattern,
    pub start: usize,
    pub end: usize,
}

/// Redacted text plus its log
#[derive(Debug, Clone, PartialEq)]
pub struct Redaction {
    pub text: String,
    pub log: Vec<RedactionEntry>,
}

impl Redaction {
    /// Sanitized log
    pub fn marks(&self) -> Vec<RedactionMark> {
        self.log.iter().map(RedactionEntry::mark).collect()
    }

    /// Whether anything was redacted
    pub fn is_clean(&self) -> bool {
        self.log.is_empty()
    }
}

/// Redact sensitive content from text
pub fn redact(text: &str) -> Redaction {
    redact_at(text, Utc::now())
}

/// Redact with a fixed log timestamp
pub fn redact_at(text: &str, now: DateTime<Utc>) -> Redaction {
    let mut kept: Vec<RedactionEntry> = Vec::new();

    for pattern in RedactionPattern::all() {
        for m in pattern.regex().find_iter(text) {
            let overlaps = kept
                .iter()
                .any(|e| m.start() < e.end && e.start < m.end());
            if overlaps {
                continue;
            }
            kept.push(RedactionEntry {
                pattern: *pattern,
                start: m.start(),
                end: m.end(),
                original: m.as_str().to_string(),
                timestamp: now,
            });
        }
    }

    kept.sort_by_key(|e| e.start);

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for entry in &kept {
        out.push_str(&text[cursor..entry.start]);
        out.push_str(REDACTION_PLACEHOLDER);
        cursor = entry.end;
    }
    out.push_str(&text[cursor..]);

    Redaction { text: out, log: kept }
}
