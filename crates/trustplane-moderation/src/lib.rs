//! # Trustplane Moderation
//!
//! Applies bulk moderation actions (suspend users, flag media, deactivate
//! twins, and their reversals) through the entity mutation interface.
//!
//! ## Outcome model
//!
//! ```text
//! per target: Applied | AlreadyInState | NotFound | Failed(reason) | Unavailable(reason)
//! ```
//!
//! Every invocation yields exactly one completed action in the ledger and
//! one audit record, whatever happened to its targets. Re-applying an action
//! is safe: targets already in the desired state report `AlreadyInState`.
//!
//! ## Threshold rules
//!
//! A [`ThresholdRule`] watches a metrics ratio and applies its action when
//! the ratio stays above the limit for `grace_buckets` consecutive buckets.
//! A [`RuleMonitor`] evaluates configured [`RuleBinding`]s on a schedule.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use trustplane_common::DEFAULT_TARGET_TIMEOUT_MS;

pub mod executor;
pub mod ledger;
pub mod monitor;
pub mod mutation;
pub mod policy;

pub use executor::{ModerationExecutor, TIMEOUT_REASON};
pub use ledger::{ActionLedger, LedgerQuery};
pub use monitor::{RuleBinding, RuleMonitor, RULE_ACTOR};
pub use mutation::{set_state, EntityMutator, InMemoryEntityStore, Transition};
pub use policy::{ThresholdEvaluation, ThresholdRule};

/// Moderation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Deadline for each target's mutation
    pub target_timeout_ms: u64,
    /// Mutations in flight per action
    pub max_concurrent_mutations: usize,
    /// Threshold rules evaluated in the background
    pub rules: Vec<RuleBinding>,
    /// Seconds between rule evaluations
    pub rule_interval_secs: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            target_timeout_ms: DEFAULT_TARGET_TIMEOUT_MS,
            max_concurrent_mutations: 32,
            rules: Vec::new(),
            rule_interval_secs: 300,
        }
    }
}

impl ModerationConfig {
    pub fn target_timeout(&self) -> Duration {
        Duration::from_millis(self.target_timeout_ms)
    }

    pub fn rule_interval(&self) -> Duration {
        Duration::from_secs(self.rule_interval_secs)
    }
}
