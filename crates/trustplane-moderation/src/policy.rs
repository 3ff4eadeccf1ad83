//! Threshold rules: rate > max_rate for `grace_buckets` trailing buckets = act

use serde::{Deserialize, Serialize};

use trustplane_common::{ActionType, ControlPlaneError, Result};
use trustplane_metrics::MetricsAggregator;

/// A metrics rate that, when exceeded for long enough, triggers an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub name: String,
    pub numerator: String,
    pub denominator: String,
    pub max_rate: f64,
    /// Trailing window inspected on each evaluation
    pub window_days: u32,
    /// Consecutive breaching buckets required, counted back from the newest
    pub grace_buckets: usize,
    pub action_type: ActionType,
}

/// Result of evaluating a rule once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEvaluation {
    pub rule: String,
    /// Rate in the newest bucket
    pub latest_rate: f64,
    /// Rate over the whole window
    pub window_rate: f64,
    pub buckets_above: usize,
    pub breached: bool,
}

impl ThresholdRule {
    pub fn validate(&self) -> Result<()> {
        if !self.max_rate.is_finite() || self.max_rate < 0.0 {
            return Err(ControlPlaneError::Config(format!(
                "rule {}: max_rate must be a non-negative number",
                self.name
            )));
        }
        if self.grace_buckets == 0 || self.window_days == 0 {
            return Err(ControlPlaneError::Config(format!(
                "rule {}: window_days and grace_buckets must be positive",
                self.name
            )));
        }
        Ok(())
    }

    pub fn is_breached(&self, rate: f64, buckets_above: usize) -> bool {
        rate > self.max_rate && buckets_above >= self.grace_buckets
    }

    /// Evaluate against the aggregator's current window
    pub fn evaluate(&self, metrics: &MetricsAggregator) -> ThresholdEvaluation {
        let rates: Vec<f64> = metrics
            .trend(&self.numerator, self.window_days)
            .iter()
            .map(|point| metrics.rate(&self.numerator, &self.denominator, point.bucket_start))
            .collect();

        let latest_rate = rates.last().copied().unwrap_or(0.0);
        let buckets_above = rates
            .iter()
            .rev()
            .take_while(|rate| **rate > self.max_rate)
            .count();

        ThresholdEvaluation {
            rule: self.name.clone(),
            latest_rate,
            window_rate: metrics.window_rate(&self.numerator, &self.denominator, self.window_days),
            buckets_above,
            breached: self.is_breached(latest_rate, buckets_above),
        }
    }
}
