//! # Trustplane Metrics
//!
//! Counts platform events into fixed UTC buckets and derives the dashboard
//! figures from them: zero-filled trends, ratios, and percentage breakdowns.
//!
//! Buckets accumulate until sealed. A sealed bucket never changes; late
//! writes to it are discarded and logged, as are writes behind the
//! retention horizon.

pub mod aggregator;
pub mod breakdown;

pub use aggregator::{AggregatorConfig, AggregatorStats, BucketKey, MetricsAggregator};
pub use breakdown::percentage_breakdown;

/// Well-known metric names
pub mod names {
    pub const MESSAGES: &str = "messages";
    pub const MESSAGE_REPORTS: &str = "message_reports";
    pub const REGISTRATIONS: &str = "registrations";
    pub const LOGINS: &str = "logins";
    pub const SUSPENSIONS: &str = "suspensions";
    pub const MEDIA_FLAGS: &str = "media_flags";

    /// Prefix for per-type media upload counters, e.g. `media_uploads:image`
    pub const MEDIA_UPLOADS_PREFIX: &str = "media_uploads:";

    /// Metric name for uploads of one media type
    pub fn media_uploads(media_type: &str) -> String {
        format!("{}{}", MEDIA_UPLOADS_PREFIX, media_type)
    }
}
