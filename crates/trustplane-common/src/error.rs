//! Error types for the control plane
//!
//! Token lifecycle errors surface verbatim to callers. Entity mutation errors
//! are folded into per-target moderation results by the executor and never
//! abort a batch.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::token::TokenPurpose;

/// Result type alias using ControlPlaneError
pub type Result<T> = std::result::Result<T, ControlPlaneError>;

/// Unified error type for control plane operations
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    // Token lifecycle errors
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    // Deadline elapsed on an external call
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Credential token lifecycle errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token not found")]
    NotFound,

    #[error("token expired at {expires_at}")]
    Expired { expires_at: DateTime<Utc> },

    #[error("token already consumed at {consumed_at}")]
    AlreadyConsumed { consumed_at: DateTime<Utc> },

    #[error("token was issued for {actual}, not {expected}")]
    WrongPurpose {
        expected: TokenPurpose,
        actual: TokenPurpose,
    },

    #[error("token lifetime must be positive, got {seconds}s")]
    InvalidDuration { seconds: i64 },

    #[error("token revoked at {revoked_at}")]
    Revoked { revoked_at: DateTime<Utc> },

    #[error("token store unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by the external entity mutation interface
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),

    #[error("entity store unavailable: {0}")]
    Unavailable(String),
}

impl From<ControlPlaneError> for TokenError {
    fn from(err: ControlPlaneError) -> Self {
        match err {
            ControlPlaneError::Token(inner) => inner,
            other => TokenError::Unavailable(other.to_string()),
        }
    }
}

/// Run `fut` to completion unless `limit` elapses first.
///
/// Expiry is reported as [`ControlPlaneError::Timeout`]; callers translate it
/// into their own taxonomy and never retry.
pub async fn with_deadline<F>(limit: Duration, what: &str, fut: F) -> Result<F::Output>
where
    F: Future,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ControlPlaneError::Timeout(format!("{} after {}ms", what, limit.as_millis())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ControlPlaneError::Token(TokenError::WrongPurpose {
            expected: TokenPurpose::EmailVerify,
            actual: TokenPurpose::PasswordReset,
        });
        assert!(err.to_string().contains("password_reset"));
        assert!(err.to_string().contains("email_verify"));
    }

    #[test]
    fn test_failed_reason_is_verbatim() {
        let err = MutationError::Failed("replica lag exceeded".to_string());
        assert_eq!(err.to_string(), "replica lag exceeded");
    }

    #[test]
    fn test_non_token_errors_become_unavailable() {
        let err: TokenError = ControlPlaneError::Timeout("token store after 5ms".into()).into();
        assert!(matches!(err, TokenError::Unavailable(msg) if msg.contains("5ms")));

        let err: TokenError = ControlPlaneError::Token(TokenError::NotFound).into();
        assert_eq!(err, TokenError::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let result = with_deadline(Duration::from_millis(10), "slow call", async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;
        assert!(matches!(result, Err(ControlPlaneError::Timeout(_))));

        let value = with_deadline(Duration::from_millis(10), "fast call", async { 7 })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
