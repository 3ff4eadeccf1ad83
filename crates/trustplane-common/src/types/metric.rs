//! Metric samples and dashboard projections

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Count for one metric over one bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric_name: String,
    /// Inclusive bucket start
    pub bucket_start: DateTime<Utc>,
    /// Exclusive bucket end
    pub bucket_end: DateTime<Utc>,
    pub count: u64,
}

/// One point of a zero-filled trend series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub bucket_start: DateTime<Utc>,
    pub count: u64,
}

/// Share of one category in a percentage breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub category: String,
    pub count: u64,
    /// Rounded to one decimal place
    pub percentage: f64,
}
