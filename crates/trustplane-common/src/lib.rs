//! # Trustplane Common
//!
//! Shared types, errors, and infrastructure for the Trustplane control plane.
//!
//! ## Core Types
//!
//! - [`CredentialToken`]: single-use, time-bounded credential record
//! - [`MetricSample`]/[`TrendPoint`]: bucketed usage counts
//! - [`ModerationAction`]: one bulk moderation invocation with per-target results
//! - [`AuditRecord`]: append-only audit entry
//!
//! ## Infrastructure
//!
//! - [`clock`]: wall-clock source and id generation
//! - [`audit`]: append-only audit log with pluggable sinks
//! - [`error`]: unified error taxonomy

pub mod audit;
pub mod clock;
pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use audit::{AuditEntry, AuditKind, AuditLog, AuditQuery, AuditRecord, AuditSink, TracingAuditSink};
pub use clock::{new_id, Clock, ManualClock, SystemClock};
pub use error::{with_deadline, ControlPlaneError, MutationError, Result, TokenError};
pub use types::{
    metric::{CategoryShare, MetricSample, TrendPoint},
    moderation::{
        ActionStatus, ActionTally, ActionTrigger, ActionType, EntityKind, ModerationAction,
        TargetResult,
    },
    token::{CredentialToken, TokenPurpose},
};

/// Trustplane version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Email verification link lifetime in hours
pub const DEFAULT_VERIFICATION_VALID_HOURS: i64 = 24;

/// Password reset link lifetime in hours
pub const DEFAULT_RESET_VALID_HOURS: i64 = 1;

/// Default metric bucket width (one UTC day)
pub const DEFAULT_BUCKET_WIDTH_SECS: i64 = 86_400;

/// Default metric retention horizon in days
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Default dashboard trend window
pub const DEFAULT_TREND_WINDOW_DAYS: u32 = 7;

/// Default bound on a single token store call
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;

/// Default bound on a single entity mutation
pub const DEFAULT_TARGET_TIMEOUT_MS: u64 = 5_000;

/// Allowed drift of a percentage breakdown from 100.0
pub const PERCENT_TOLERANCE: f64 = 0.05;
