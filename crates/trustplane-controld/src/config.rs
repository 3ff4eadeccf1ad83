//! Control plane configuration

use std::collections::HashSet;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use trustplane_common::{DEFAULT_RETENTION_DAYS, DEFAULT_TREND_WINDOW_DAYS};
use trustplane_metrics::AggregatorConfig;
use trustplane_moderation::ModerationConfig;
use trustplane_tokens::TokenServiceConfig;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Service host
    pub host: String,
    /// Service port
    pub port: u16,
    /// Token lifetimes and store deadline
    pub tokens: TokenServiceConfig,
    /// Bucket width and retention
    pub metrics: AggregatorConfig,
    /// Per-target deadline and fan-out
    pub moderation: ModerationConfig,
    /// Dashboard read defaults
    pub dashboard: DashboardSettings,
    /// Background sweeps
    pub maintenance: MaintenanceSettings,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            tokens: TokenServiceConfig::default(),
            metrics: AggregatorConfig::default(),
            moderation: ModerationConfig::default(),
            dashboard: DashboardSettings::default(),
            maintenance: MaintenanceSettings::default(),
        }
    }
}

impl ControlPlaneConfig {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the
    /// `TRUSTPLANE_*` keys
    pub fn load_from<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        // Platform-provided PORT wins over defaults, TRUSTPLANE_PORT wins over both
        set(&lookup, "PORT", &mut cfg.port);
        if let Some(host) = lookup("TRUSTPLANE_HOST") {
            cfg.host = host;
        }
        set(&lookup, "TRUSTPLANE_PORT", &mut cfg.port);

        // Token settings
        set(
            &lookup,
            "TRUSTPLANE_TOKEN_VERIFICATION_HOURS",
            &mut cfg.tokens.verification_valid_hours,
        );
        set(&lookup, "TRUSTPLANE_TOKEN_RESET_HOURS", &mut cfg.tokens.reset_valid_hours);
        set(&lookup, "TRUSTPLANE_TOKEN_STORE_TIMEOUT_MS", &mut cfg.tokens.store_timeout_ms);
        set(
            &lookup,
            "TRUSTPLANE_TOKEN_SUPERSEDE_RESETS",
            &mut cfg.tokens.supersede_reset_tokens,
        );

        // Metrics settings
        set(
            &lookup,
            "TRUSTPLANE_METRICS_BUCKET_WIDTH_SECS",
            &mut cfg.metrics.bucket_width_secs,
        );
        set(
            &lookup,
            "TRUSTPLANE_METRICS_RETENTION_DAYS",
            &mut cfg.metrics.retention_days,
        );

        // Moderation settings
        set(
            &lookup,
            "TRUSTPLANE_MODERATION_TARGET_TIMEOUT_MS",
            &mut cfg.moderation.target_timeout_ms,
        );
        set(
            &lookup,
            "TRUSTPLANE_MODERATION_MAX_CONCURRENCY",
            &mut cfg.moderation.max_concurrent_mutations,
        );
        set(
            &lookup,
            "TRUSTPLANE_MODERATION_RULE_INTERVAL_SECS",
            &mut cfg.moderation.rule_interval_secs,
        );
        if let Some(raw) = lookup("TRUSTPLANE_MODERATION_RULES") {
            cfg.moderation.rules = serde_json::from_str(&raw)
                .context("TRUSTPLANE_MODERATION_RULES is not a JSON rule list")?;
        }

        // Dashboard settings
        set(
            &lookup,
            "TRUSTPLANE_DASHBOARD_TREND_DAYS",
            &mut cfg.dashboard.trend_window_days,
        );
        set(
            &lookup,
            "TRUSTPLANE_DASHBOARD_MAX_WINDOW_DAYS",
            &mut cfg.dashboard.max_window_days,
        );
        if let Some(types) = lookup("TRUSTPLANE_DASHBOARD_MEDIA_TYPES") {
            cfg.dashboard.media_types = types
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }

        // Maintenance settings
        set(
            &lookup,
            "TRUSTPLANE_SWEEP_INTERVAL_SECS",
            &mut cfg.maintenance.sweep_interval_secs,
        );
        set(
            &lookup,
            "TRUSTPLANE_TOKEN_RETENTION_HOURS",
            &mut cfg.maintenance.token_retention_hours,
        );

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the components cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tokens.verification_valid_hours <= 0 || self.tokens.reset_valid_hours <= 0 {
            bail!("token lifetimes must be positive");
        }
        if self.tokens.store_timeout_ms == 0 || self.moderation.target_timeout_ms == 0 {
            bail!("timeouts must be non-zero");
        }
        if self.moderation.max_concurrent_mutations == 0 {
            bail!("moderation concurrency must be non-zero");
        }
        if self.dashboard.trend_window_days == 0 {
            bail!("dashboard trend window must be non-zero");
        }
        if self.dashboard.max_window_days < self.dashboard.trend_window_days {
            bail!(
                "dashboard window cap of {} days is below the default window of {} days",
                self.dashboard.max_window_days,
                self.dashboard.trend_window_days
            );
        }
        if self.moderation.rule_interval_secs == 0 {
            bail!("rule interval must be non-zero");
        }
        let mut names = HashSet::new();
        for binding in &self.moderation.rules {
            binding.validate()?;
            if !names.insert(binding.rule.name.as_str()) {
                bail!("duplicate rule name {}", binding.rule.name);
            }
            if i64::from(binding.rule.window_days) > self.metrics.retention_days {
                bail!(
                    "rule {}: window of {} days exceeds metric retention",
                    binding.rule.name,
                    binding.rule.window_days
                );
            }
        }
        if self.maintenance.sweep_interval_secs == 0 {
            bail!("sweep interval must be non-zero");
        }
        self.metrics.validate()?;
        Ok(())
    }
}

fn set<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparsable setting"),
        }
    }
}

/// Dashboard read defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSettings {
    /// Default trend window in days
    pub trend_window_days: u32,
    /// Largest `days` a dashboard read may ask for
    pub max_window_days: u32,
    /// Media types shown in the upload breakdown
    pub media_types: Vec<String>,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            trend_window_days: DEFAULT_TREND_WINDOW_DAYS,
            max_window_days: DEFAULT_RETENTION_DAYS as u32,
            media_types: vec![
                "image".to_string(),
                "video".to_string(),
                "audio".to_string(),
                "document".to_string(),
            ],
        }
    }
}

/// Background sweep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceSettings {
    pub sweep_interval_secs: u64,
    /// How long finished tokens are kept after expiry
    pub token_retention_hours: i64,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
            token_retention_hours: 24 * 7,
        }
    }
}
