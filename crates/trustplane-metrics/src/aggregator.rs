//! Bucketed metric aggregation with DashMap
//!
//! Counts events per metric name in fixed-width buckets aligned to the Unix
//! epoch (with the default one-day width, UTC midnight). Buckets are
//! independent: increments are atomic adds on a per-bucket counter and never
//! take a lock across buckets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use trustplane_common::{
    CategoryShare, Clock, ControlPlaneError, MetricSample, Result, TrendPoint,
    DEFAULT_BUCKET_WIDTH_SECS, DEFAULT_RETENTION_DAYS,
};

use crate::breakdown::percentage_breakdown;

const SECS_PER_DAY: i64 = 86_400;

/// Aggregator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Bucket width in seconds; must divide one day
    pub bucket_width_secs: i64,
    /// Writes older than this many days are discarded
    pub retention_days: i64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            bucket_width_secs: DEFAULT_BUCKET_WIDTH_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bucket_width_secs <= 0 || SECS_PER_DAY % self.bucket_width_secs != 0 {
            return Err(ControlPlaneError::Config(format!(
                "bucket width {}s must be positive and divide one day",
                self.bucket_width_secs
            )));
        }
        if self.retention_days <= 0 {
            return Err(ControlPlaneError::Config(format!(
                "retention of {} days must be positive",
                self.retention_days
            )));
        }
        Ok(())
    }

    fn buckets_per_day(&self) -> i64 {
        SECS_PER_DAY / self.bucket_width_secs
    }
}

/// Key of one metric bucket
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketKey {
    pub metric: String,
    /// Bucket start (Unix seconds)
    pub bucket_start: i64,
}

impl BucketKey {
    fn new(metric: &str, bucket_start: i64) -> Self {
        Self {
            metric: metric.to_string(),
            bucket_start,
        }
    }
}

/// Write accounting
#[derive(Debug, Default)]
pub struct AggregatorStats {
    pub recorded: AtomicU64,
    pub discarded_out_of_retention: AtomicU64,
    pub discarded_sealed: AtomicU64,
}

/// Metrics aggregator
pub struct MetricsAggregator {
    config: AggregatorConfig,
    clock: Arc<dyn Clock>,
    /// Buckets still accumulating
    open: DashMap<BucketKey, AtomicU64>,
    /// Closed buckets; never written again
    sealed: DashMap<BucketKey, u64>,
    stats: AggregatorStats,
}

impl MetricsAggregator {
    /// Create an aggregator after validating `config`
    pub fn new(config: AggregatorConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            open: DashMap::new(),
            sealed: DashMap::new(),
            stats: AggregatorStats::default(),
        })
    }

    /// Create with one-day buckets and default retention
    pub fn daily(clock: Arc<dyn Clock>) -> Self {
        Self {
            config: AggregatorConfig::default(),
            clock,
            open: DashMap::new(),
            sealed: DashMap::new(),
            stats: AggregatorStats::default(),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }

    /// Start (Unix seconds) of the bucket covering `timestamp`
    fn bucket_of(&self, timestamp: DateTime<Utc>) -> i64 {
        timestamp
            .timestamp()
            .div_euclid(self.config.bucket_width_secs)
            * self.config.bucket_width_secs
    }

    /// Start of the bucket covering `timestamp`
    pub fn bucket_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        to_datetime(self.bucket_of(timestamp))
    }

    /// Oldest bucket start still inside retention
    fn retention_horizon(&self, now: DateTime<Utc>) -> i64 {
        self.bucket_of(now) - self.config.retention_days * SECS_PER_DAY
    }

    /// Add `delta` to the bucket covering `timestamp`.
    ///
    /// Never fails: writes behind the retention horizon or into a sealed
    /// bucket are accepted and discarded.
    pub fn record(&self, metric: &str, timestamp: DateTime<Utc>, delta: u64) {
        let start = self.bucket_of(timestamp);

        if start < self.retention_horizon(self.clock.now()) {
            self.stats
                .discarded_out_of_retention
                .fetch_add(1, Ordering::Relaxed);
            debug!(metric, %timestamp, "Discarded write behind retention horizon");
            return;
        }

        let key = BucketKey::new(metric, start);
        if self.sealed.contains_key(&key) {
            self.stats.discarded_sealed.fetch_add(1, Ordering::Relaxed);
            debug!(metric, %timestamp, "Discarded late write into sealed bucket");
            return;
        }

        if let Some(counter) = self.open.get(&key) {
            counter.fetch_add(delta, Ordering::Relaxed);
        } else {
            self.open
                .entry(key)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(delta, Ordering::Relaxed);
        }
        self.stats.recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one event now
    pub fn increment(&self, metric: &str) {
        self.record(metric, self.clock.now(), 1);
    }

    /// Raw count of one bucket (0 if nothing was recorded)
    pub fn count(&self, metric: &str, bucket_start: DateTime<Utc>) -> u64 {
        let key = BucketKey::new(metric, self.bucket_of(bucket_start));
        if let Some(sealed) = self.sealed.get(&key) {
            return *sealed;
        }
        self.open
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Trailing `window_days` of buckets ending with the current one,
    /// oldest first, zero-filled
    pub fn trend(&self, metric: &str, window_days: u32) -> Vec<TrendPoint> {
        let width = self.config.bucket_width_secs;
        let current = self.bucket_of(self.clock.now());
        let buckets = window_days as i64 * self.config.buckets_per_day();

        (0..buckets)
            .rev()
            .map(|back| {
                let start = to_datetime(current - back * width);
                TrendPoint {
                    bucket_start: start,
                    count: self.count(metric, start),
                }
            })
            .collect()
    }

    /// Sum of the trailing `window_days`
    pub fn window_total(&self, metric: &str, window_days: u32) -> u64 {
        self.trend(metric, window_days).iter().map(|p| p.count).sum()
    }

    /// `numerator / denominator` for one bucket; 0.0 when the denominator is zero
    pub fn rate(&self, numerator: &str, denominator: &str, bucket_start: DateTime<Utc>) -> f64 {
        ratio(
            self.count(numerator, bucket_start),
            self.count(denominator, bucket_start),
        )
    }

    /// `numerator / denominator` over the trailing `window_days`
    pub fn window_rate(&self, numerator: &str, denominator: &str, window_days: u32) -> f64 {
        ratio(
            self.window_total(numerator, window_days),
            self.window_total(denominator, window_days),
        )
    }

    /// Percentage split of `categories` over the trailing `window_days`
    pub fn breakdown(&self, categories: &[&str], window_days: u32) -> Vec<CategoryShare> {
        let counts: Vec<(String, u64)> = categories
            .iter()
            .map(|c| (c.to_string(), self.window_total(c, window_days)))
            .collect();
        percentage_breakdown(&counts)
    }

    /// Seal every bucket that ended at or before `now`
    #[instrument(skip(self))]
    pub fn seal(&self, now: DateTime<Utc>) -> Vec<MetricSample> {
        let width = self.config.bucket_width_secs;
        let cutoff = now.timestamp();
        let mut closed = Vec::new();

        self.open.retain(|key, counter| {
            if key.bucket_start + width > cutoff {
                return true;
            }
            let count = counter.load(Ordering::Relaxed);
            match self.sealed.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    // Re-opened by a write racing an earlier seal
                    warn!(metric = %key.metric, bucket_start = key.bucket_start, count, "Dropped late counts for sealed bucket");
                    self.stats
                        .discarded_sealed
                        .fetch_add(1, Ordering::Relaxed);
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(count);
                    closed.push(MetricSample {
                        metric_name: key.metric.clone(),
                        bucket_start: to_datetime(key.bucket_start),
                        bucket_end: to_datetime(key.bucket_start + width),
                        count,
                    });
                }
            }
            false
        });

        if !closed.is_empty() {
            info!(closed_count = closed.len(), "Sealed metric buckets");
        }
        closed
    }

    /// Sealed samples of `metric`, oldest first
    pub fn sealed_samples(&self, metric: &str) -> Vec<MetricSample> {
        let width = self.config.bucket_width_secs;
        let mut samples: Vec<MetricSample> = self
            .sealed
            .iter()
            .filter(|entry| entry.key().metric == metric)
            .map(|entry| MetricSample {
                metric_name: metric.to_string(),
                bucket_start: to_datetime(entry.key().bucket_start),
                bucket_end: to_datetime(entry.key().bucket_start + width),
                count: *entry.value(),
            })
            .collect();
        samples.sort_by_key(|s| s.bucket_start);
        samples
    }

    /// Evict buckets behind the retention horizon at `now`
    #[instrument(skip(self))]
    pub fn sweep_retention(&self, now: DateTime<Utc>) -> usize {
        let horizon = self.retention_horizon(now);
        let before = self.open.len() + self.sealed.len();

        self.open.retain(|key, _| key.bucket_start >= horizon);
        self.sealed.retain(|key, _| key.bucket_start >= horizon);

        let evicted = before.saturating_sub(self.open.len() + self.sealed.len());
        if evicted > 0 {
            info!(evicted, "Evicted metric buckets past retention");
        }
        evicted
    }

    /// Start background bucket sealer
    pub fn start_sealer(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let period = std::time::Duration::from_secs(self.config.bucket_width_secs as u64);
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                let now = self.clock.now();
                let sealed = self.seal(now);
                if !sealed.is_empty() {
                    debug!(count = sealed.len(), "Auto-sealed metric buckets");
                }
            }
        })
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
