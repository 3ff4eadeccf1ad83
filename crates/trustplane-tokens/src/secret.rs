//! Opaque token format and secret hashing
//!
//! An opaque token is `<public id>.<secret>`: the public id is the simple
//! (hyphenless) form of the token's UUID and the secret is 32 random bytes,
//! URL-safe base64 without padding. Only `BLAKE3(domain || id || secret)` is
//! persisted.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

/// Secret length in bytes
pub const SECRET_LEN: usize = 32;

const HASH_DOMAIN: &[u8] = b"trustplane.credential-token.v1";

/// Plaintext token handed to the end user exactly once
#[derive(Clone, PartialEq, Eq)]
pub struct OpaqueToken(String);

impl OpaqueToken {
    fn new(id: &Uuid, secret: &[u8]) -> Self {
        Self(format!("{}.{}", id.simple(), URL_SAFE_NO_PAD.encode(secret)))
    }

    /// The plaintext, for embedding in an email link
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for OpaqueToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OpaqueToken(<redacted>)")
    }
}

impl From<String> for OpaqueToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for OpaqueToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Fresh token id, opaque token and secret hash
pub fn generate(id: Uuid) -> (OpaqueToken, [u8; 32]) {
    let mut secret = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    let hash = hash_secret(&id, &secret);
    (OpaqueToken::new(&id, &secret), *hash.as_bytes())
}

/// Split an opaque token into its public id and secret bytes
pub fn parse(token: &str) -> Option<(Uuid, Vec<u8>)> {
    let (id_part, secret_part) = token.trim().split_once('.')?;
    let id = Uuid::try_parse(id_part).ok()?;
    let secret = URL_SAFE_NO_PAD.decode(secret_part).ok()?;
    if secret.len() != SECRET_LEN {
        return None;
    }
    Some((id, secret))
}

/// One-way hash binding the secret to its token id
pub fn hash_secret(id: &Uuid, secret: &[u8]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(HASH_DOMAIN);
    hasher.update(id.as_bytes());
    hasher.update(secret);
    hasher.finalize()
}

/// Constant-time comparison against a stored hash
pub fn matches(stored: &[u8; 32], candidate: &blake3::Hash) -> bool {
    // blake3::Hash equality is constant-time
    blake3::Hash::from(*stored) == *candidate
}
