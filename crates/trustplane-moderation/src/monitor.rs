//! Scheduled threshold evaluation
//!
//! Each tick evaluates every bound rule against the aggregator. A rule fires
//! once when it starts breaching and stays quiet until it has recovered.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use trustplane_common::{ModerationAction, Result};
use trustplane_metrics::MetricsAggregator;

use crate::executor::ModerationExecutor;
use crate::policy::ThresholdRule;

/// Actor recorded on rule-triggered actions
pub const RULE_ACTOR: &str = "threshold-monitor";

/// A threshold rule together with the entities it acts on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleBinding {
    #[serde(flatten)]
    pub rule: ThresholdRule,
    pub target_ids: Vec<String>,
}

impl RuleBinding {
    pub fn validate(&self) -> Result<()> {
        self.rule.validate()
    }
}

/// Evaluates bound rules and applies their actions on breach
pub struct RuleMonitor {
    executor: ModerationExecutor,
    metrics: Arc<MetricsAggregator>,
    bindings: Vec<RuleBinding>,
    /// Rules breached at the last tick
    breached: Mutex<HashSet<String>>,
}

impl RuleMonitor {
    pub fn new(
        executor: ModerationExecutor,
        metrics: Arc<MetricsAggregator>,
        bindings: Vec<RuleBinding>,
    ) -> Self {
        Self {
            executor,
            metrics,
            bindings,
            breached: Mutex::new(HashSet::new()),
        }
    }

    pub fn bindings(&self) -> &[RuleBinding] {
        &self.bindings
    }

    /// Evaluate every rule once, returning the actions fired
    pub async fn tick(&self) -> Vec<ModerationAction> {
        let mut fired = Vec::new();

        for binding in &self.bindings {
            let rule = &binding.rule;
            let evaluation = rule.evaluate(&self.metrics);

            let newly_breached = {
                let mut breached = self.breached.lock();
                if evaluation.breached {
                    breached.insert(rule.name.clone())
                } else {
                    if breached.remove(&rule.name) {
                        info!(rule = %rule.name, rate = evaluation.latest_rate, "Threshold recovered");
                    }
                    false
                }
            };
            if !newly_breached {
                continue;
            }

            let targets = binding.target_ids.iter().cloned();
            if let Some(action) = self
                .executor
                .apply_if_breached(rule, &self.metrics, targets, RULE_ACTOR)
                .await
            {
                fired.push(action);
            }
        }

        if !fired.is_empty() {
            debug!(count = fired.len(), "Threshold rules fired");
        }
        fired
    }

    /// Start background rule evaluation every `period`
    pub fn start(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }
}
