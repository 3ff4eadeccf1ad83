//! Credential tokens - single-use, time-bounded secrets
//!
//! Key characteristics:
//! - Only a one-way hash of the secret is ever stored
//! - `consumed_at` is written at most once, by a successful validation
//! - A token is bound to exactly one purpose
//! - Records are retained after consumption for audit

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a credential token may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    EmailVerify,
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::EmailVerify => "email_verify",
            TokenPurpose::PasswordReset => "password_reset",
        }
    }
}

impl std::fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted credential token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialToken {
    /// Public token id (lookup key)
    pub id: Uuid,

    /// Subject the token was issued to
    pub subject_id: String,

    /// Purpose the token is bound to
    pub purpose: TokenPurpose,

    /// BLAKE3 hash of the secret half of the opaque token
    pub secret_hash: [u8; 32],

    pub issued_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,

    /// Set once by the successful validation
    pub consumed_at: Option<DateTime<Utc>>,

    /// Set when a newer token of the same purpose supersedes this one
    pub revoked_at: Option<DateTime<Utc>>,
}

impl CredentialToken {
    /// Expired strictly after `expires_at`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Still redeemable at `now`
    pub fn is_outstanding(&self, now: DateTime<Utc>) -> bool {
        !self.is_consumed() && !self.is_revoked() && !self.is_expired(now)
    }

    /// Remaining validity in whole hours, rounded up
    pub fn valid_hours(&self) -> i64 {
        let secs = (self.expires_at - self.issued_at).num_seconds();
        (secs + 3599) / 3600
    }
}
