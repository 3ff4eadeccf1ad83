//! # Trustplane Tokens
//!
//! Time-bounded, single-use credential tokens for email verification and
//! password reset.
//!
//! ## Guarantees
//!
//! - The plaintext secret is returned once and never stored
//! - A token is redeemable for exactly one purpose
//! - Validation is one atomic check-and-consume against the store, so of
//!   any number of concurrent validations exactly one can succeed
//! - Expired tokens report `Expired`, never `AlreadyConsumed`
//! - Store outages and timeouts surface as `Unavailable`

pub mod notify;
pub mod secret;
pub mod service;
pub mod store;

pub use notify::{Notifier, NotifyError, TracingNotifier};
pub use secret::OpaqueToken;
pub use service::{TokenService, TokenServiceConfig};
pub use store::{ConsumeCheck, ConsumeOutcome, InMemoryTokenStore, StoreError, TokenStore};
