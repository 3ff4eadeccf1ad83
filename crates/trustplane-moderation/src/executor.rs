//! Bulk moderation executor
//!
//! ## Flow
//!
//! ```text
//! apply: dedupe targets -> Requested -> Applying
//!        -> per-target mutations in parallel (each under the deadline)
//!        -> Completed -> ledger + one audit record
//! ```
//!
//! The pipeline runs in its own task. A caller that stops waiting does not
//! stop the batch, and the action and its audit record are still written.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{error, info, instrument, warn};

use trustplane_common::{
    new_id, with_deadline, ActionTrigger, ActionType, AuditEntry, AuditKind, AuditLog, Clock,
    ModerationAction, MutationError, TargetResult,
};
use trustplane_metrics::MetricsAggregator;

use crate::ledger::ActionLedger;
use crate::mutation::{set_state, EntityMutator, Transition};
use crate::policy::ThresholdRule;
use crate::ModerationConfig;

/// Reason recorded for a target whose mutation outlived the deadline
pub const TIMEOUT_REASON: &str = "timeout";

/// Applies moderation actions and records their outcome
#[derive(Clone)]
pub struct ModerationExecutor {
    mutator: Arc<dyn EntityMutator>,
    ledger: Arc<ActionLedger>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    config: ModerationConfig,
}

impl ModerationExecutor {
    pub fn new(
        mutator: Arc<dyn EntityMutator>,
        ledger: Arc<ActionLedger>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        config: ModerationConfig,
    ) -> Self {
        Self {
            mutator,
            ledger,
            audit,
            clock,
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<ActionLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    /// Apply `action_type` to every target on behalf of `actor_id`.
    ///
    /// Always returns a completed action with one result per distinct
    /// target; failures are reported per target and never abort the batch.
    pub async fn apply<I, S>(
        &self,
        action_type: ActionType,
        target_ids: I,
        actor_id: &str,
        timeout: Duration,
    ) -> ModerationAction
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apply_with_trigger(action_type, target_ids, actor_id, timeout, ActionTrigger::Manual)
            .await
    }

    /// [`apply`](Self::apply) with an explicit trigger
    #[instrument(skip(self, action_type, target_ids, trigger), fields(action_type = %action_type))]
    pub async fn apply_with_trigger<I, S>(
        &self,
        action_type: ActionType,
        target_ids: I,
        actor_id: &str,
        timeout: Duration,
        trigger: ActionTrigger,
    ) -> ModerationAction
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let targets: BTreeSet<String> = target_ids.into_iter().map(Into::into).collect();
        let requested = ModerationAction::new(
            new_id(),
            actor_id,
            action_type,
            targets,
            trigger,
            self.clock.now(),
        );

        let this = self.clone();
        let action = requested.clone();
        match tokio::spawn(async move { this.run(action, timeout).await }).await {
            Ok(action) => action,
            Err(e) => {
                error!(action_id = %requested.id, error = %e, "Moderation task aborted");
                let mut action = requested;
                action.begin();
                action.complete(BTreeMap::new(), self.clock.now());
                self.record(&action);
                action
            }
        }
    }

    /// Evaluate `rule` and apply its action to `target_ids` only if breached
    pub async fn apply_if_breached<I, S>(
        &self,
        rule: &ThresholdRule,
        metrics: &MetricsAggregator,
        target_ids: I,
        actor_id: &str,
    ) -> Option<ModerationAction>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let evaluation = rule.evaluate(metrics);
        if !evaluation.breached {
            return None;
        }

        info!(
            rule = %rule.name,
            rate = evaluation.latest_rate,
            buckets_above = evaluation.buckets_above,
            "Threshold breached"
        );
        let trigger = ActionTrigger::Threshold {
            rule: rule.name.clone(),
            observed_rate: evaluation.latest_rate,
        };
        Some(
            self.apply_with_trigger(
                rule.action_type,
                target_ids,
                actor_id,
                self.config.target_timeout(),
                trigger,
            )
            .await,
        )
    }

    async fn run(&self, mut action: ModerationAction, timeout: Duration) -> ModerationAction {
        action.begin();
        let (kind, desired) = action.action_type.desired_state();

        let calls: Vec<_> = action
            .target_ids
            .iter()
            .cloned()
            .map(|id| {
                let mutator = self.mutator.clone();
                async move {
                    let outcome = with_deadline(
                        timeout,
                        "entity mutation",
                        set_state(mutator.as_ref(), kind, &id, desired),
                    )
                    .await;

                    let result = match outcome {
                        Ok(Ok(Transition::Applied)) => TargetResult::Applied,
                        Ok(Ok(Transition::Unchanged)) => TargetResult::AlreadyInState,
                        Ok(Err(MutationError::NotFound(_))) => TargetResult::NotFound,
                        Ok(Err(MutationError::Failed(reason))) => TargetResult::Failed(reason),
                        Ok(Err(MutationError::Unavailable(reason))) => {
                            TargetResult::Unavailable(reason)
                        }
                        Err(_) => TargetResult::Failed(TIMEOUT_REASON.to_string()),
                    };
                    (id, result)
                }
            })
            .collect();

        let results: BTreeMap<String, TargetResult> = stream::iter(calls)
            .buffer_unordered(self.config.max_concurrent_mutations.max(1))
            .collect()
            .await;

        action.complete(results, self.clock.now());
        self.record(&action);
        action
    }

    fn record(&self, action: &ModerationAction) {
        let tally = action.tally();

        for (target, result) in &action.per_target_result {
            match result {
                TargetResult::Failed(reason) => {
                    warn!(action_id = %action.id, target = %target, reason = %reason, "Target mutation failed")
                }
                TargetResult::Unavailable(reason) => {
                    warn!(action_id = %action.id, target = %target, reason = %reason, "Entity store unavailable")
                }
                _ => {}
            }
        }

        let trigger = match &action.trigger {
            ActionTrigger::Manual => "manual".to_string(),
            ActionTrigger::Threshold { rule, .. } => format!("threshold:{}", rule),
        };
        self.audit.append(
            AuditEntry::new(
                AuditKind::ModerationApplied,
                &action.actor_id,
                &action.id.to_string(),
            )
            .with_detail("action_type", action.action_type)
            .with_detail("trigger", trigger)
            .with_detail("targets", action.target_ids.len())
            .with_detail("applied", tally.applied)
            .with_detail("already_in_state", tally.already_in_state)
            .with_detail("not_found", tally.not_found)
            .with_detail("failed", tally.failed)
            .with_detail("unavailable", tally.unavailable),
        );
        self.ledger.publish(action.clone());

        info!(
            action_id = %action.id,
            actor = %action.actor_id,
            action_type = %action.action_type,
            targets = action.target_ids.len(),
            applied = tally.applied,
            "Moderation action completed"
        );
    }
}
