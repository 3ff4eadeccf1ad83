//! Component wiring shared by the HTTP handlers

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use trustplane_common::{AuditLog, Clock};
use trustplane_metrics::MetricsAggregator;
use trustplane_moderation::{ActionLedger, EntityMutator, ModerationExecutor, RuleMonitor};
use trustplane_tokens::{InMemoryTokenStore, Notifier, TokenService, TokenStore};

use crate::config::ControlPlaneConfig;

/// Everything a request handler can reach
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub metrics: Arc<MetricsAggregator>,
    pub moderation: ModerationExecutor,
    pub rules: Arc<RuleMonitor>,
    pub audit: Arc<AuditLog>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<ControlPlaneConfig>,
}

/// External collaborators the control plane drives
pub struct Collaborators {
    pub token_store: Arc<dyn TokenStore>,
    pub notifier: Arc<dyn Notifier>,
    pub mutator: Arc<dyn EntityMutator>,
}

impl Collaborators {
    /// In-memory token store plus the given outbound interfaces
    pub fn in_memory(notifier: Arc<dyn Notifier>, mutator: Arc<dyn EntityMutator>) -> Self {
        Self {
            token_store: Arc::new(InMemoryTokenStore::new()),
            notifier,
            mutator,
        }
    }
}

impl AppState {
    pub fn new(
        config: ControlPlaneConfig,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;

        let audit = Arc::new(AuditLog::new(clock.clone()));

        let tokens = Arc::new(TokenService::new(
            collaborators.token_store,
            collaborators.notifier,
            audit.clone(),
            clock.clone(),
            config.tokens.clone(),
        ));
        let metrics = Arc::new(MetricsAggregator::new(config.metrics.clone(), clock.clone())?);
        let moderation = ModerationExecutor::new(
            collaborators.mutator,
            Arc::new(ActionLedger::new()),
            audit.clone(),
            clock.clone(),
            config.moderation.clone(),
        );
        let rules = Arc::new(RuleMonitor::new(
            moderation.clone(),
            metrics.clone(),
            config.moderation.rules.clone(),
        ));

        Ok(Self {
            tokens,
            metrics,
            moderation,
            rules,
            audit,
            clock,
            config: Arc::new(config),
        })
    }

    /// Start the bucket sealer, the periodic retention sweep, and the
    /// threshold rule monitor when rules are configured
    pub fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let sealer = self.metrics.clone().start_sealer();

        let state = self.clone();
        let sweeper = tokio::spawn(async move {
            let period = StdDuration::from_secs(state.config.maintenance.sweep_interval_secs);
            let retention =
                chrono::Duration::hours(state.config.maintenance.token_retention_hours);
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                state.sweep(retention).await;
            }
        });

        let mut tasks = vec![sealer, sweeper];
        if !self.rules.bindings().is_empty() {
            info!(rules = self.rules.bindings().len(), "Starting threshold rule monitor");
            tasks.push(
                self.rules
                    .clone()
                    .start(self.config.moderation.rule_interval()),
            );
        }
        tasks
    }

    /// One retention pass over tokens and metric buckets
    pub async fn sweep(&self, token_retention: chrono::Duration) {
        match self.tokens.sweep(token_retention).await {
            Ok(removed) if removed > 0 => info!(removed, "Token sweep finished"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Token sweep failed"),
        }
        self.metrics.sweep_retention(self.clock.now());
    }
}
