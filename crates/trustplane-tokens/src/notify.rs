//! Notification interface for token delivery
//!
//! Delivery is fire-and-forget from the control plane's perspective: a
//! failed send is logged and never invalidates the issued token.

use async_trait::async_trait;
use tracing::info;

use crate::secret::OpaqueToken;

/// Errors reported by a notifier
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Outbound email collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification_email(
        &self,
        subject_id: &str,
        token: &OpaqueToken,
        valid_hours: i64,
    ) -> Result<(), NotifyError>;

    async fn send_password_reset_email(
        &self,
        subject_id: &str,
        token: &OpaqueToken,
        valid_hours: i64,
    ) -> Result<(), NotifyError>;
}

/// Notifier that only logs, for development deployments
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send_verification_email(
        &self,
        subject_id: &str,
        _token: &OpaqueToken,
        valid_hours: i64,
    ) -> Result<(), NotifyError> {
        info!(subject = %subject_id, valid_hours, "Verification email queued");
        Ok(())
    }

    async fn send_password_reset_email(
        &self,
        subject_id: &str,
        _token: &OpaqueToken,
        valid_hours: i64,
    ) -> Result<(), NotifyError> {
        info!(subject = %subject_id, valid_hours, "Password reset email queued");
        Ok(())
    }
}
