//! Token issuance and validation
//!
//! ## Flow
//!
//! ```text
//! issue:    secret -> hash -> store.insert -> audit -> [revoke older resets]
//!           -> (plaintext to caller)
//! validate: parse -> hash -> store.consume (atomic check-and-set) -> audit
//! ```

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use trustplane_common::{
    new_id, with_deadline, AuditEntry, AuditKind, AuditLog, Clock, CredentialToken, TokenError,
    TokenPurpose, DEFAULT_RESET_VALID_HOURS, DEFAULT_STORE_TIMEOUT_MS,
    DEFAULT_VERIFICATION_VALID_HOURS,
};

use crate::notify::{Notifier, NotifyError};
use crate::secret::{self, OpaqueToken};
use crate::store::{ConsumeCheck, ConsumeOutcome, TokenStore};

/// Actor recorded for rejected validations, whose caller is unknown
const ANONYMOUS_ACTOR: &str = "anonymous";

/// Token service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenServiceConfig {
    /// Email verification link lifetime
    pub verification_valid_hours: i64,
    /// Password reset link lifetime
    pub reset_valid_hours: i64,
    /// Bound on each token store call
    pub store_timeout_ms: u64,
    /// Whether a new reset token revokes the subject's older ones
    pub supersede_reset_tokens: bool,
}

impl Default for TokenServiceConfig {
    fn default() -> Self {
        Self {
            verification_valid_hours: DEFAULT_VERIFICATION_VALID_HOURS,
            reset_valid_hours: DEFAULT_RESET_VALID_HOURS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            supersede_reset_tokens: true,
        }
    }
}

/// Issues and validates credential tokens
pub struct TokenService {
    store: Arc<dyn TokenStore>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    config: TokenServiceConfig,
}

impl TokenService {
    pub fn new(
        store: Arc<dyn TokenStore>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        config: TokenServiceConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            audit,
            clock,
            config,
        }
    }

    fn store_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.config.store_timeout_ms)
    }

    /// Issue a token for `subject_id`.
    ///
    /// The plaintext is returned exactly once; only its hash is stored.
    #[instrument(skip(self), fields(purpose = %purpose))]
    pub async fn issue(
        &self,
        subject_id: &str,
        purpose: TokenPurpose,
        valid_for: Duration,
    ) -> Result<(OpaqueToken, CredentialToken), TokenError> {
        if valid_for <= Duration::zero() {
            return Err(TokenError::InvalidDuration {
                seconds: valid_for.num_seconds(),
            });
        }

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(valid_for)
            .ok_or(TokenError::InvalidDuration {
                seconds: valid_for.num_seconds(),
            })?;

        let id = new_id();
        let (opaque, secret_hash) = secret::generate(id);
        let token = CredentialToken {
            id,
            subject_id: subject_id.to_string(),
            purpose,
            secret_hash,
            issued_at: now,
            expires_at,
            consumed_at: None,
            revoked_at: None,
        };

        // The new token must be stored before older ones are revoked
        with_deadline(
            self.store_timeout(),
            "token store insert",
            self.store.insert(token.clone()),
        )
        .await??;

        self.audit.append(
            AuditEntry::new(AuditKind::TokenIssued, subject_id, &id.to_string())
                .with_detail("purpose", purpose)
                .with_detail("expires_at", expires_at.to_rfc3339()),
        );
        debug!(token_id = %id, subject = %subject_id, "Issued token");

        if purpose == TokenPurpose::PasswordReset && self.config.supersede_reset_tokens {
            self.supersede(subject_id, purpose, &id, now).await;
        }

        Ok((opaque, token))
    }

    /// Validate and consume a token, returning its subject.
    ///
    /// Linearizable: of any number of concurrent validations of one token,
    /// at most one succeeds.
    #[instrument(skip(self, opaque), fields(purpose = %purpose))]
    pub async fn validate(&self, opaque: &str, purpose: TokenPurpose) -> Result<String, TokenError> {
        let Some((id, raw_secret)) = secret::parse(opaque) else {
            self.record_rejection("malformed", purpose, &TokenError::NotFound);
            return Err(TokenError::NotFound);
        };

        let check = ConsumeCheck {
            purpose,
            secret_hash: secret::hash_secret(&id, &raw_secret),
            now: self.clock.now(),
        };

        let outcome = with_deadline(
            self.store_timeout(),
            "token store consume",
            self.store.consume(&id, &check),
        )
        .await??;

        match outcome {
            ConsumeOutcome::Consumed(token) => {
                self.audit.append(
                    AuditEntry::new(AuditKind::TokenConsumed, &token.subject_id, &id.to_string())
                        .with_detail("purpose", purpose),
                );
                info!(token_id = %id, subject = %token.subject_id, "Token consumed");
                Ok(token.subject_id)
            }
            ConsumeOutcome::Rejected(err) => {
                self.record_rejection(&id.to_string(), purpose, &err);
                Err(err)
            }
        }
    }

    /// Issue an email verification token and hand it to the notifier
    pub async fn issue_email_verification(
        &self,
        subject_id: &str,
    ) -> Result<(OpaqueToken, CredentialToken), TokenError> {
        let valid_for = Duration::hours(self.config.verification_valid_hours);
        let (opaque, token) = self
            .issue(subject_id, TokenPurpose::EmailVerify, valid_for)
            .await?;

        let sent = with_deadline(
            self.store_timeout(),
            "verification email",
            self.notifier
                .send_verification_email(subject_id, &opaque, token.valid_hours()),
        )
        .await;
        report_delivery(subject_id, "verification", sent);

        Ok((opaque, token))
    }

    /// Issue a password reset token and hand it to the notifier
    pub async fn issue_password_reset(
        &self,
        subject_id: &str,
    ) -> Result<(OpaqueToken, CredentialToken), TokenError> {
        let valid_for = Duration::hours(self.config.reset_valid_hours);
        let (opaque, token) = self
            .issue(subject_id, TokenPurpose::PasswordReset, valid_for)
            .await?;

        let sent = with_deadline(
            self.store_timeout(),
            "password reset email",
            self.notifier
                .send_password_reset_email(subject_id, &opaque, token.valid_hours()),
        )
        .await;
        report_delivery(subject_id, "password_reset", sent);

        Ok((opaque, token))
    }

    /// Look up a token record without touching it
    pub async fn inspect(&self, id: &Uuid) -> Result<Option<CredentialToken>, TokenError> {
        Ok(with_deadline(self.store_timeout(), "token store get", self.store.get(id)).await??)
    }

    /// Drop tokens that expired more than `retention` ago
    #[instrument(skip(self))]
    pub async fn sweep(&self, retention: Duration) -> Result<usize, TokenError> {
        let cutoff = self.clock.now() - retention;
        let removed =
            with_deadline(self.store_timeout(), "token store sweep", self.store.sweep(cutoff))
                .await??;
        if removed > 0 {
            info!(removed, %cutoff, "Swept expired tokens");
        }
        Ok(removed)
    }

    /// Revoke the subject's older outstanding tokens of `purpose`.
    ///
    /// A store failure here leaves the older tokens live next to the new one.
    async fn supersede(
        &self,
        subject_id: &str,
        purpose: TokenPurpose,
        keep: &Uuid,
        now: DateTime<Utc>,
    ) {
        let revoked = match with_deadline(
            self.store_timeout(),
            "token store revoke",
            self.store.revoke_outstanding(subject_id, purpose, keep, now),
        )
        .await
        {
            Ok(Ok(revoked)) => revoked,
            Ok(Err(e)) => {
                warn!(subject = %subject_id, error = %e, "Older tokens not revoked");
                return;
            }
            Err(e) => {
                warn!(subject = %subject_id, error = %e, "Older tokens not revoked");
                return;
            }
        };

        for id in revoked {
            self.audit.append(
                AuditEntry::new(AuditKind::TokenRevoked, subject_id, &id.to_string())
                    .with_detail("purpose", purpose)
                    .with_detail("reason", "superseded"),
            );
        }
    }

    fn record_rejection(&self, token_ref: &str, purpose: TokenPurpose, err: &TokenError) {
        self.audit.append(
            AuditEntry::new(AuditKind::TokenRejected, ANONYMOUS_ACTOR, token_ref)
                .with_detail("purpose", purpose)
                .with_detail("reason", err),
        );
    }
}

/// Log a failed delivery; the issued token stays valid either way
fn report_delivery(
    subject_id: &str,
    kind: &str,
    sent: trustplane_common::Result<Result<(), NotifyError>>,
) {
    match sent {
        Ok(Ok(())) => debug!(subject = %subject_id, kind, "Notification handed off"),
        Ok(Err(e)) => warn!(subject = %subject_id, kind, error = %e, "Notification not delivered"),
        Err(e) => warn!(subject = %subject_id, kind, error = %e, "Notification not delivered"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{MockNotifier, TracingNotifier};
    use crate::store::{InMemoryTokenStore, StoreError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};
    use trustplane_common::{AuditQuery, ManualClock};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 15, 10, 0, 0).unwrap()
    }

    struct Harness {
        service: TokenService,
        clock: Arc<ManualClock>,
        audit: Arc<AuditLog>,
    }

    fn harness_with(store: Arc<dyn TokenStore>, notifier: Arc<dyn Notifier>) -> Harness {
        let clock = Arc::new(ManualClock::new(start()));
        let audit = Arc::new(AuditLog::new(clock.clone()));
        let service = TokenService::new(
            store,
            notifier,
            audit.clone(),
            clock.clone(),
            TokenServiceConfig::default(),
        );
        Harness {
            service,
            clock,
            audit,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(InMemoryTokenStore::new()), Arc::new(TracingNotifier))
    }

    /// Store whose every call hangs forever
    struct StalledStore;

    #[async_trait]
    impl TokenStore for StalledStore {
        async fn insert(&self, _token: CredentialToken) -> Result<(), StoreError> {
            futures::future::pending().await
        }

        async fn get(&self, _id: &Uuid) -> Result<Option<CredentialToken>, StoreError> {
            futures::future::pending().await
        }

        async fn consume(&self, _id: &Uuid, _check: &ConsumeCheck) -> Result<ConsumeOutcome, StoreError> {
            futures::future::pending().await
        }

        async fn revoke_outstanding(
            &self,
            _subject_id: &str,
            _purpose: TokenPurpose,
            _keep: &Uuid,
            _now: DateTime<Utc>,
        ) -> Result<Vec<Uuid>, StoreError> {
            futures::future::pending().await
        }

        async fn sweep(&self, _cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
            futures::future::pending().await
        }

        async fn count(&self) -> Result<usize, StoreError> {
            futures::future::pending().await
        }
    }

    /// In-memory store whose inserts can be switched off
    #[derive(Default)]
    struct FailingInsertStore {
        inner: InMemoryTokenStore,
        reject_inserts: AtomicBool,
    }

    #[async_trait]
    impl TokenStore for FailingInsertStore {
        async fn insert(&self, token: CredentialToken) -> Result<(), StoreError> {
            if self.reject_inserts.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("primary down".into()));
            }
            self.inner.insert(token).await
        }

        async fn get(&self, id: &Uuid) -> Result<Option<CredentialToken>, StoreError> {
            self.inner.get(id).await
        }

        async fn consume(&self, id: &Uuid, check: &ConsumeCheck) -> Result<ConsumeOutcome, StoreError> {
            self.inner.consume(id, check).await
        }

        async fn revoke_outstanding(
            &self,
            subject_id: &str,
            purpose: TokenPurpose,
            keep: &Uuid,
            now: DateTime<Utc>,
        ) -> Result<Vec<Uuid>, StoreError> {
            self.inner.revoke_outstanding(subject_id, purpose, keep, now).await
        }

        async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
            self.inner.sweep(cutoff).await
        }

        async fn count(&self) -> Result<usize, StoreError> {
            self.inner.count().await
        }
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let h = harness();
        let (opaque, token) = h
            .service
            .issue("user-42", TokenPurpose::EmailVerify, Duration::hours(24))
            .await
            .unwrap();

        assert_eq!(token.expires_at, start() + Duration::hours(24));
        assert!(opaque.expose().starts_with(&token.id.simple().to_string()));

        let subject = h
            .service
            .validate(opaque.expose(), TokenPurpose::EmailVerify)
            .await
            .unwrap();
        assert_eq!(subject, "user-42");

        let stored = h.service.inspect(&token.id).await.unwrap().unwrap();
        assert_eq!(stored.consumed_at, Some(start()));
    }

    #[tokio::test]
    async fn test_wrong_purpose_does_not_consume() {
        let h = harness();
        let (opaque, _) = h
            .service
            .issue("user-1", TokenPurpose::PasswordReset, Duration::hours(1))
            .await
            .unwrap();

        let err = h
            .service
            .validate(opaque.expose(), TokenPurpose::EmailVerify)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TokenError::WrongPurpose {
                expected: TokenPurpose::EmailVerify,
                actual: TokenPurpose::PasswordReset,
            }
        );

        let subject = h
            .service
            .validate(opaque.expose(), TokenPurpose::PasswordReset)
            .await
            .unwrap();
        assert_eq!(subject, "user-1");
    }

    #[tokio::test]
    async fn test_second_validation_is_already_consumed() {
        let h = harness();
        let (opaque, _) = h
            .service
            .issue("user-1", TokenPurpose::EmailVerify, Duration::hours(1))
            .await
            .unwrap();

        h.service
            .validate(opaque.expose(), TokenPurpose::EmailVerify)
            .await
            .unwrap();
        let err = h
            .service
            .validate(opaque.expose(), TokenPurpose::EmailVerify)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::AlreadyConsumed { .. }));
    }

    #[tokio::test]
    async fn test_non_positive_duration_rejected() {
        let h = harness();
        for valid_for in [Duration::zero(), Duration::seconds(-5)] {
            let err = h
                .service
                .issue("user-1", TokenPurpose::EmailVerify, valid_for)
                .await
                .unwrap_err();
            assert!(matches!(err, TokenError::InvalidDuration { .. }));
        }
        assert!(h.audit.is_empty());
    }

    #[tokio::test]
    async fn test_expired_reports_expired() {
        let h = harness();
        let (opaque, _) = h
            .service
            .issue("user-1", TokenPurpose::EmailVerify, Duration::hours(1))
            .await
            .unwrap();

        h.clock.advance(Duration::hours(1) + Duration::seconds(1));
        let err = h
            .service
            .validate(opaque.expose(), TokenPurpose::EmailVerify)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Expired { .. }));
    }

    #[tokio::test]
    async fn test_valid_exactly_at_expiry() {
        let h = harness();
        let (opaque, _) = h
            .service
            .issue("user-1", TokenPurpose::EmailVerify, Duration::hours(1))
            .await
            .unwrap();

        h.clock.advance(Duration::hours(1));
        assert!(h
            .service
            .validate(opaque.expose(), TokenPurpose::EmailVerify)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_tokens() {
        let h = harness();
        let err = h
            .service
            .validate("garbage", TokenPurpose::EmailVerify)
            .await
            .unwrap_err();
        assert_eq!(err, TokenError::NotFound);

        let (opaque, _) = h
            .service
            .issue("user-1", TokenPurpose::EmailVerify, Duration::hours(1))
            .await
            .unwrap();
        let (_, secret) = opaque.expose().split_once('.').unwrap();
        let forged = format!("{}.{}", Uuid::now_v7().simple(), secret);
        let err = h
            .service
            .validate(&forged, TokenPurpose::EmailVerify)
            .await
            .unwrap_err();
        assert_eq!(err, TokenError::NotFound);

        let rejected = h.audit.list(&AuditQuery {
            kind: Some(AuditKind::TokenRejected),
            ..Default::default()
        });
        assert_eq!(rejected.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_validation_single_winner() {
        let h = harness();
        let (opaque, _) = h
            .service
            .issue("user-1", TokenPurpose::EmailVerify, Duration::hours(1))
            .await
            .unwrap();

        let service = Arc::new(h.service);
        let mut handles = Vec::new();
        for _ in 0..32 {
            let service = service.clone();
            let token = opaque.expose().to_string();
            handles.push(tokio::spawn(async move {
                service.validate(&token, TokenPurpose::EmailVerify).await
            }));
        }

        let mut successes = 0;
        let mut consumed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(subject) => {
                    assert_eq!(subject, "user-1");
                    successes += 1;
                }
                Err(TokenError::AlreadyConsumed { .. }) => consumed += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(consumed, 31);
    }

    #[tokio::test]
    async fn test_new_reset_token_revokes_previous() {
        let h = harness();
        let (first, _) = h.service.issue_password_reset("user-1").await.unwrap();
        let (second, _) = h.service.issue_password_reset("user-1").await.unwrap();

        let err = h
            .service
            .validate(first.expose(), TokenPurpose::PasswordReset)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Revoked { .. }));

        assert!(h
            .service
            .validate(second.expose(), TokenPurpose::PasswordReset)
            .await
            .is_ok());

        let revoked = h.audit.list(&AuditQuery {
            kind: Some(AuditKind::TokenRevoked),
            ..Default::default()
        });
        assert_eq!(revoked.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reset_insert_keeps_previous_token() {
        let store = Arc::new(FailingInsertStore::default());
        let h = harness_with(store.clone(), Arc::new(TracingNotifier));
        let (first, _) = h.service.issue_password_reset("user-1").await.unwrap();

        store.reject_inserts.store(true, Ordering::SeqCst);
        let err = h.service.issue_password_reset("user-1").await.unwrap_err();
        assert!(matches!(err, TokenError::Unavailable(_)));

        let revoked = h.audit.list(&AuditQuery {
            kind: Some(AuditKind::TokenRevoked),
            ..Default::default()
        });
        assert!(revoked.is_empty());
        assert_eq!(
            h.service
                .validate(first.expose(), TokenPurpose::PasswordReset)
                .await
                .unwrap(),
            "user-1"
        );
    }

    #[tokio::test]
    async fn test_reset_does_not_revoke_verification() {
        let h = harness();
        let (verify, _) = h.service.issue_email_verification("user-1").await.unwrap();
        h.service.issue_password_reset("user-1").await.unwrap();

        assert!(h
            .service
            .validate(verify.expose(), TokenPurpose::EmailVerify)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_token_valid() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send_verification_email()
            .times(1)
            .returning(|_, _, hours| {
                assert_eq!(hours, 24);
                Err(crate::notify::NotifyError::Delivery("smtp down".into()))
            });

        let h = harness_with(Arc::new(InMemoryTokenStore::new()), Arc::new(notifier));
        let (opaque, token) = h.service.issue_email_verification("user-9").await.unwrap();
        assert_eq!(token.expires_at - token.issued_at, Duration::hours(24));

        assert_eq!(
            h.service
                .validate(opaque.expose(), TokenPurpose::EmailVerify)
                .await
                .unwrap(),
            "user-9"
        );
    }

    #[tokio::test]
    async fn test_reset_lifetime_is_one_hour() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send_password_reset_email()
            .withf(|subject, _, hours| subject == "user-3" && *hours == 1)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let h = harness_with(Arc::new(InMemoryTokenStore::new()), Arc::new(notifier));
        let (_, token) = h.service.issue_password_reset("user-3").await.unwrap();
        assert_eq!(token.purpose, TokenPurpose::PasswordReset);
        assert_eq!(token.expires_at, start() + Duration::hours(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_is_unavailable() {
        let h = harness_with(Arc::new(StalledStore), Arc::new(TracingNotifier));

        let err = h
            .service
            .issue("user-1", TokenPurpose::EmailVerify, Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Unavailable(_)));

        let (opaque, _) = crate::secret::generate(Uuid::now_v7());
        let err = h
            .service
            .validate(opaque.expose(), TokenPurpose::EmailVerify)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_lifecycle_is_audited() {
        let h = harness();
        let (opaque, token) = h
            .service
            .issue("user-5", TokenPurpose::EmailVerify, Duration::hours(1))
            .await
            .unwrap();
        h.service
            .validate(opaque.expose(), TokenPurpose::EmailVerify)
            .await
            .unwrap();

        let records = h.audit.list(&AuditQuery {
            subject_id: Some(token.id.to_string()),
            ..Default::default()
        });
        let kinds: Vec<AuditKind> = records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![AuditKind::TokenIssued, AuditKind::TokenConsumed]);
        assert!(records.iter().all(|r| r.actor_id == "user-5"));
    }

    #[tokio::test]
    async fn test_sweep_uses_retention() {
        let h = harness();
        h.service
            .issue("user-1", TokenPurpose::PasswordReset, Duration::hours(1))
            .await
            .unwrap();
        h.service
            .issue("user-1", TokenPurpose::EmailVerify, Duration::hours(24))
            .await
            .unwrap();

        h.clock.advance(Duration::days(3));
        assert_eq!(h.service.sweep(Duration::days(2)).await.unwrap(), 1);
    }
}
