//! Credential token storage
//!
//! The store exclusively owns token state. Consumption is a single atomic
//! conditional update: implementations must run [`check_redeemable`] and the
//! write of `consumed_at` under one lock or transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use trustplane_common::{CredentialToken, TokenError, TokenPurpose};

use crate::secret;

/// Trait for token storage backends
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Store a freshly issued token
    async fn insert(&self, token: CredentialToken) -> Result<(), StoreError>;

    /// Get a token by public id
    async fn get(&self, id: &Uuid) -> Result<Option<CredentialToken>, StoreError>;

    /// Check and consume a token in one atomic step
    async fn consume(&self, id: &Uuid, check: &ConsumeCheck) -> Result<ConsumeOutcome, StoreError>;

    /// Revoke every outstanding token of `purpose` held by `subject_id`
    /// that was issued before `keep` (token ids are time-ordered)
    async fn revoke_outstanding(
        &self,
        subject_id: &str,
        purpose: TokenPurpose,
        keep: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError>;

    /// Remove tokens that expired before `cutoff`
    async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Get total token count
    async fn count(&self) -> Result<usize, StoreError>;
}

/// Errors from token store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Token id already exists: {0}")]
    Duplicate(Uuid),

    #[error("Token store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<StoreError> for TokenError {
    fn from(err: StoreError) -> Self {
        TokenError::Unavailable(err.to_string())
    }
}

/// Conditions a consumption must satisfy
#[derive(Debug, Clone)]
pub struct ConsumeCheck {
    pub purpose: TokenPurpose,
    pub secret_hash: blake3::Hash,
    pub now: DateTime<Utc>,
}

/// Result of an atomic consumption attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeOutcome {
    /// The token was redeemable and is now consumed
    Consumed(CredentialToken),
    /// The token was left untouched
    Rejected(TokenError),
}

/// Decide whether `token` may be consumed.
///
/// Failure precedence: hash mismatch (reported as `NotFound`), wrong
/// purpose, expired, revoked, already consumed. An expired token therefore
/// never reports `AlreadyConsumed`.
pub fn check_redeemable(token: &CredentialToken, check: &ConsumeCheck) -> Result<(), TokenError> {
    if !secret::matches(&token.secret_hash, &check.secret_hash) {
        return Err(TokenError::NotFound);
    }
    if token.purpose != check.purpose {
        return Err(TokenError::WrongPurpose {
            expected: check.purpose,
            actual: token.purpose,
        });
    }
    if token.is_expired(check.now) {
        return Err(TokenError::Expired {
            expires_at: token.expires_at,
        });
    }
    if let Some(revoked_at) = token.revoked_at {
        return Err(TokenError::Revoked { revoked_at });
    }
    if let Some(consumed_at) = token.consumed_at {
        return Err(TokenError::AlreadyConsumed { consumed_at });
    }
    Ok(())
}

/// In-memory storage implementation
///
/// Uses DashMap; a consumption holds the shard write lock for the token
/// across the check and the write.
pub struct InMemoryTokenStore {
    /// All tokens by public id
    tokens: DashMap<Uuid, CredentialToken>,

    /// Index of token ids by subject
    by_subject: DashMap<String, Vec<Uuid>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
            by_subject: DashMap::new(),
        }
    }
}

impl Default for InMemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn insert(&self, token: CredentialToken) -> Result<(), StoreError> {
        let id = token.id;
        let subject = token.subject_id.clone();

        match self.tokens.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(StoreError::Duplicate(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(token);
            }
        }

        self.by_subject.entry(subject).or_default().push(id);
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<CredentialToken>, StoreError> {
        Ok(self.tokens.get(id).map(|t| t.clone()))
    }

    async fn consume(&self, id: &Uuid, check: &ConsumeCheck) -> Result<ConsumeOutcome, StoreError> {
        let Some(mut token) = self.tokens.get_mut(id) else {
            return Ok(ConsumeOutcome::Rejected(TokenError::NotFound));
        };

        if let Err(err) = check_redeemable(&token, check) {
            return Ok(ConsumeOutcome::Rejected(err));
        }

        token.consumed_at = Some(check.now);
        Ok(ConsumeOutcome::Consumed(token.clone()))
    }

    async fn revoke_outstanding(
        &self,
        subject_id: &str,
        purpose: TokenPurpose,
        keep: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = self
            .by_subject
            .get(subject_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();

        let mut revoked = Vec::new();
        for id in ids.into_iter().filter(|id| id < keep) {
            if let Some(mut token) = self.tokens.get_mut(&id) {
                if token.purpose == purpose && token.is_outstanding(now) {
                    token.revoked_at = Some(now);
                    revoked.push(id);
                }
            }
        }
        Ok(revoked)
    }

    async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.tokens.len();
        self.tokens.retain(|_, token| token.expires_at >= cutoff);

        self.by_subject.retain(|_, ids| {
            ids.retain(|id| self.tokens.contains_key(id));
            !ids.is_empty()
        });

        Ok(before.saturating_sub(self.tokens.len()))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.tokens.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()
    }

    fn issue(subject: &str, purpose: TokenPurpose, valid: Duration) -> (CredentialToken, blake3::Hash) {
        let id = Uuid::now_v7();
        let (opaque, stored) = secret::generate(id);
        let (_, raw) = secret::parse(opaque.expose()).unwrap();
        let token = CredentialToken {
            id,
            subject_id: subject.to_string(),
            purpose,
            secret_hash: stored,
            issued_at: now(),
            expires_at: now() + valid,
            consumed_at: None,
            revoked_at: None,
        };
        (token, secret::hash_secret(&id, &raw))
    }

    fn check(purpose: TokenPurpose, hash: blake3::Hash, at: DateTime<Utc>) -> ConsumeCheck {
        ConsumeCheck {
            purpose,
            secret_hash: hash,
            now: at,
        }
    }

    #[tokio::test]
    async fn test_consume_once() {
        let store = InMemoryTokenStore::new();
        let (token, hash) = issue("u1", TokenPurpose::EmailVerify, Duration::hours(1));
        let id = token.id;
        store.insert(token).await.unwrap();

        let first = store
            .consume(&id, &check(TokenPurpose::EmailVerify, hash, now()))
            .await
            .unwrap();
        assert!(matches!(first, ConsumeOutcome::Consumed(t) if t.consumed_at == Some(now())));

        let second = store
            .consume(&id, &check(TokenPurpose::EmailVerify, hash, now()))
            .await
            .unwrap();
        assert!(matches!(
            second,
            ConsumeOutcome::Rejected(TokenError::AlreadyConsumed { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejections_leave_token_untouched() {
        let store = InMemoryTokenStore::new();
        let (token, hash) = issue("u1", TokenPurpose::PasswordReset, Duration::hours(1));
        let id = token.id;
        store.insert(token).await.unwrap();

        let wrong = store
            .consume(&id, &check(TokenPurpose::EmailVerify, hash, now()))
            .await
            .unwrap();
        assert!(matches!(wrong, ConsumeOutcome::Rejected(TokenError::WrongPurpose { .. })));

        let bad_secret = store
            .consume(
                &id,
                &check(TokenPurpose::PasswordReset, blake3::hash(b"guess"), now()),
            )
            .await
            .unwrap();
        assert_eq!(bad_secret, ConsumeOutcome::Rejected(TokenError::NotFound));

        assert!(store.get(&id).await.unwrap().unwrap().consumed_at.is_none());
    }

    #[tokio::test]
    async fn test_expired_wins_over_consumed() {
        let store = InMemoryTokenStore::new();
        let (token, hash) = issue("u1", TokenPurpose::EmailVerify, Duration::hours(1));
        let id = token.id;
        store.insert(token).await.unwrap();

        store
            .consume(&id, &check(TokenPurpose::EmailVerify, hash, now()))
            .await
            .unwrap();
        let late = store
            .consume(
                &id,
                &check(TokenPurpose::EmailVerify, hash, now() + Duration::hours(2)),
            )
            .await
            .unwrap();
        assert!(matches!(late, ConsumeOutcome::Rejected(TokenError::Expired { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_insert() {
        let store = InMemoryTokenStore::new();
        let (token, _) = issue("u1", TokenPurpose::EmailVerify, Duration::hours(1));
        store.insert(token.clone()).await.unwrap();
        assert!(matches!(store.insert(token).await, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_revoke_outstanding_only_matching_purpose() {
        let store = InMemoryTokenStore::new();
        let (reset, _) = issue("u1", TokenPurpose::PasswordReset, Duration::hours(1));
        let (verify, _) = issue("u1", TokenPurpose::EmailVerify, Duration::hours(24));
        let (other, _) = issue("u2", TokenPurpose::PasswordReset, Duration::hours(1));
        let (newest, _) = issue("u1", TokenPurpose::PasswordReset, Duration::hours(1));
        let reset_id = reset.id;
        let newest_id = newest.id;
        store.insert(reset).await.unwrap();
        store.insert(verify).await.unwrap();
        store.insert(other).await.unwrap();
        store.insert(newest).await.unwrap();

        let revoked = store
            .revoke_outstanding("u1", TokenPurpose::PasswordReset, &newest_id, now())
            .await
            .unwrap();
        assert_eq!(revoked, vec![reset_id]);
        let kept = store.get(&newest_id).await.unwrap().unwrap();
        assert!(kept.revoked_at.is_none());
    }

    #[tokio::test]
    async fn test_sweep() {
        let store = InMemoryTokenStore::new();
        let (short, _) = issue("u1", TokenPurpose::PasswordReset, Duration::hours(1));
        let (long, _) = issue("u1", TokenPurpose::EmailVerify, Duration::hours(48));
        store.insert(short).await.unwrap();
        store.insert(long).await.unwrap();

        let removed = store.sweep(now() + Duration::hours(24)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
