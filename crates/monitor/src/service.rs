//! `AutopilotService` — the operation surface of the control loop.
//!
//! Owns the monitor registry, the rebalance and bid executors, and
//! per-campaign budget rules. Every public operation maps onto one REST route.

use crate::monitor::{CampaignMonitor, Collaborators, PerformanceSnapshot};
use crate::registry::{MonitorHandle, MonitorRegistry};
use campaign_budget::{
    AllocationAnalysis, ApprovalOutcome, BidExecutor, BidOptimization, BidOptions,
    RebalanceExecution, RebalanceExecutor, RebalanceOptions,
};
use campaign_core::ports::call_with_timeout;
use campaign_core::rules::{BudgetRules, MonitorConfig, MonitorThresholds};
use campaign_core::types::{Alert, BudgetHistoryEntry, Campaign};
use campaign_core::{CampaignError, CampaignResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStarted {
    pub campaign_id: String,
    pub interval_ms: u64,
    pub thresholds: MonitorThresholds,
    pub baseline_established: bool,
    /// True when a running monitor was replaced.
    pub restarted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotFound,
}

pub struct AutopilotService {
    deps: Collaborators,
    registry: MonitorRegistry,
    executor: RebalanceExecutor,
    bids: BidExecutor,
    rules: DashMap<String, BudgetRules>,
    default_rules: BudgetRules,
    default_monitor: MonitorConfig,
}

impl AutopilotService {
    pub fn new(
        deps: Collaborators,
        default_rules: BudgetRules,
        default_monitor: MonitorConfig,
    ) -> Self {
        let executor =
            RebalanceExecutor::new(deps.store.clone(), default_monitor.external_timeout());
        let bids = BidExecutor::new(deps.actions.clone(), default_monitor.external_timeout());
        Self {
            deps,
            registry: MonitorRegistry::new(),
            executor,
            bids,
            rules: DashMap::new(),
            default_rules,
            default_monitor,
        }
    }

    // ─── Monitoring ─────────────────────────────────────────────────────

    pub async fn start_monitoring(
        &self,
        campaign_id: &str,
        config: Option<MonitorConfig>,
    ) -> CampaignResult<MonitorStarted> {
        let config = config.unwrap_or_else(|| self.default_monitor.clone());
        config.validate()?;

        let campaign = self.load_campaign(campaign_id).await?;
        let rules = self.budget_rules(campaign_id);
        check_minimums(&campaign, &rules)?;

        let monitor = Arc::new(CampaignMonitor::new(
            campaign_id,
            config.clone(),
            rules.targets,
            self.deps.clone(),
        ));
        let baseline_established = match monitor.refresh_baseline().await {
            Ok(()) => true,
            Err(e) if e.is_external() || matches!(e, CampaignError::InsufficientData { .. }) => {
                false
            }
            Err(e) => return Err(e),
        };

        let replaced = self.registry.insert(MonitorHandle::spawn(monitor));
        let restarted = replaced.is_some();
        if let Some(previous) = replaced {
            let grace = previous.monitor().config().external_timeout();
            previous.stop(grace).await;
        }

        metrics::gauge!("monitor.active").set(self.registry.len() as f64);
        info!(
            campaign_id,
            interval_ms = config.interval_ms,
            baseline_established,
            restarted,
            "Monitoring started"
        );

        Ok(MonitorStarted {
            campaign_id: campaign_id.to_string(),
            interval_ms: config.interval_ms,
            thresholds: config.thresholds,
            baseline_established,
            restarted,
        })
    }

    /// Stop and remove a monitor. No tick runs after this returns.
    pub async fn stop_monitoring(&self, campaign_id: &str) -> StopOutcome {
        let Some(handle) = self.registry.remove(campaign_id) else {
            return StopOutcome::NotFound;
        };
        let grace = handle.monitor().config().external_timeout();
        handle.stop(grace).await;

        metrics::gauge!("monitor.active").set(self.registry.len() as f64);
        info!(campaign_id, "Monitoring stopped");
        StopOutcome::Stopped
    }

    pub fn get_performance_snapshot(
        &self,
        campaign_id: &str,
    ) -> CampaignResult<PerformanceSnapshot> {
        let state = self.monitor_state(campaign_id)?;
        let snapshot = state.read().snapshot(chrono::Utc::now());
        Ok(snapshot)
    }

    pub fn get_alerts(&self, campaign_id: &str) -> CampaignResult<Vec<Alert>> {
        let state = self.monitor_state(campaign_id)?;
        let alerts = state.read().alerts();
        Ok(alerts)
    }

    pub fn active_monitors(&self) -> Vec<String> {
        self.registry.campaign_ids()
    }

    /// Stop every monitor, for process shutdown.
    pub async fn shutdown(&self) {
        for campaign_id in self.registry.campaign_ids() {
            self.stop_monitoring(&campaign_id).await;
        }
    }

    // ─── Budget ─────────────────────────────────────────────────────────

    pub async fn analyze_budget_allocation(
        &self,
        campaign_id: &str,
    ) -> CampaignResult<AllocationAnalysis> {
        let rules = self.budget_rules(campaign_id);
        self.executor.analyze(campaign_id, &rules).await
    }

    pub async fn execute_rebalance(
        &self,
        campaign_id: &str,
        options: RebalanceOptions,
    ) -> CampaignResult<RebalanceExecution> {
        let rules = self.budget_rules(campaign_id);
        self.executor.execute(campaign_id, &rules, options).await
    }

    pub async fn simulate_rebalance(
        &self,
        campaign_id: &str,
    ) -> CampaignResult<RebalanceExecution> {
        self.execute_rebalance(campaign_id, RebalanceOptions { dry_run: true })
            .await
    }

    pub async fn approve_pending_change(
        &self,
        change_id: Uuid,
        approved: bool,
    ) -> CampaignResult<ApprovalOutcome> {
        let pending = self
            .executor
            .pending_change(change_id)
            .ok_or_else(|| CampaignError::not_found(format!("pending change {change_id}")))?;
        let rules = self.budget_rules(&pending.campaign_id);
        self.executor
            .approve_pending_change(change_id, approved, &rules)
            .await
    }

    /// Recommend CPA-driven bid changes and hand the ones that clear their
    /// confidence gate to the action executor.
    pub async fn optimize_bids(
        &self,
        campaign_id: &str,
        options: BidOptions,
    ) -> CampaignResult<BidOptimization> {
        let campaign = self.load_campaign(campaign_id).await?;
        let rules = self.budget_rules(campaign_id);
        Ok(self.bids.optimize(&campaign, &rules, options).await)
    }

    pub fn pending_changes(&self, campaign_id: &str) -> Vec<campaign_budget::PendingChange> {
        self.executor.pending_for(campaign_id)
    }

    pub async fn get_budget_history(
        &self,
        campaign_id: &str,
    ) -> CampaignResult<Vec<BudgetHistoryEntry>> {
        Ok(self.load_campaign(campaign_id).await?.budget_history)
    }

    pub fn set_budget_rules(&self, campaign_id: &str, rules: BudgetRules) -> CampaignResult<()> {
        rules.validate()?;
        info!(campaign_id, platforms = rules.platforms.len(), "Budget rules updated");
        self.rules.insert(campaign_id.to_string(), rules);
        Ok(())
    }

    /// Rules configured for the campaign, or the service defaults.
    pub fn budget_rules(&self, campaign_id: &str) -> BudgetRules {
        self.rules
            .get(campaign_id)
            .map(|r| r.clone())
            .unwrap_or_else(|| self.default_rules.clone())
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn monitor_state(
        &self,
        campaign_id: &str,
    ) -> CampaignResult<Arc<parking_lot::RwLock<crate::monitor::MonitorState>>> {
        self.registry
            .state(campaign_id)
            .ok_or_else(|| CampaignError::not_found(format!("monitor for campaign {campaign_id}")))
    }

    async fn load_campaign(&self, campaign_id: &str) -> CampaignResult<Campaign> {
        call_with_timeout(
            self.default_monitor.external_timeout(),
            "get_campaign",
            self.deps.store.get_campaign(campaign_id),
        )
        .await?
        .ok_or_else(|| CampaignError::not_found(format!("campaign {campaign_id}")))
    }
}

/// The daily budget must cover the minimums of every active platform.
fn check_minimums(campaign: &Campaign, rules: &BudgetRules) -> CampaignResult<()> {
    let required: f64 = campaign
        .active_platforms()
        .map(|p| rules.rules_for(&p.platform).min_daily_budget)
        .sum();
    if campaign.daily_budget < required {
        warn!(
            campaign_id = %campaign.id,
            daily_budget = campaign.daily_budget,
            required,
            "Daily budget below platform minimums"
        );
        return Err(CampaignError::Config(format!(
            "daily budget {:.2} is below the {:.2} required by platform minimums",
            campaign.daily_budget, required
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::memory::{
        InMemoryCampaignStore, InMemoryMetricsSource, RecordingActionExecutor,
        RecordingNotificationSink,
    };
    use campaign_core::types::{
        CampaignStatus, ChannelStatus, MetricsSnapshot, PerformanceCounters, PlatformChannel,
    };
    use chrono::Utc;

    fn service_with(
        campaign: Campaign,
    ) -> (Arc<InMemoryCampaignStore>, Arc<InMemoryMetricsSource>, AutopilotService) {
        let store = Arc::new(InMemoryCampaignStore::new());
        store.insert(campaign);
        let metrics = Arc::new(InMemoryMetricsSource::new());
        let deps = Collaborators {
            store: store.clone(),
            metrics: metrics.clone(),
            notifications: Arc::new(RecordingNotificationSink::new()),
            actions: Arc::new(RecordingActionExecutor::new()),
        };
        let service = AutopilotService::new(deps, BudgetRules::default(), MonitorConfig::default());
        (store, metrics, service)
    }

    fn campaign(daily_budget: f64) -> Campaign {
        Campaign {
            id: "c-1".into(),
            name: "Alumni".into(),
            daily_budget,
            status: CampaignStatus::Active,
            platforms: vec![
                PlatformChannel {
                    platform: "google_ads".into(),
                    daily_budget: 50.0,
                    status: ChannelStatus::Active,
                    performance: PerformanceCounters::default(),
                },
                PlatformChannel {
                    platform: "linkedin_ads".into(),
                    daily_budget: 40.0,
                    status: ChannelStatus::Active,
                    performance: PerformanceCounters::default(),
                },
            ],
            budget_history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_start_rejects_budget_below_minimums() {
        let (_, _, service) = service_with(campaign(80.0));
        let result = service.start_monitoring("c-1", None).await;
        assert!(matches!(result, Err(CampaignError::Config(_))));
        assert!(service.active_monitors().is_empty());
    }

    #[tokio::test]
    async fn test_start_without_history_still_runs() {
        let (_, _, service) = service_with(campaign(500.0));
        let started = service.start_monitoring("c-1", None).await.unwrap();
        assert!(!started.baseline_established);
        assert!(!started.restarted);
        assert_eq!(started.interval_ms, 300_000);

        let snapshot = service.get_performance_snapshot("c-1").unwrap();
        assert!(snapshot.insufficient_data);
        assert!(service.get_alerts("c-1").unwrap().is_empty());

        assert_eq!(service.stop_monitoring("c-1").await, StopOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_restart_replaces_config() {
        let (_, metrics, service) = service_with(campaign(500.0));
        let now = Utc::now();
        metrics.set_history(
            "c-1",
            (1..=10)
                .map(|h| {
                    MetricsSnapshot::new(
                        "all",
                        now - chrono::Duration::hours(h),
                        PerformanceCounters {
                            impressions: 1_000,
                            clicks: 30,
                            conversions: 1,
                            cost: 40.0,
                            revenue: 160.0,
                        },
                    )
                })
                .collect(),
        );

        let first = service.start_monitoring("c-1", None).await.unwrap();
        assert!(first.baseline_established);

        let config = MonitorConfig {
            interval_ms: 60_000,
            ..MonitorConfig::default()
        };
        let second = service.start_monitoring("c-1", Some(config)).await.unwrap();
        assert!(second.restarted);
        assert_eq!(second.interval_ms, 60_000);
        assert_eq!(service.active_monitors(), vec!["c-1".to_string()]);

        service.shutdown().await;
        assert!(service.active_monitors().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let (_, _, service) = service_with(campaign(500.0));
        let config = MonitorConfig {
            interval_ms: 0,
            ..MonitorConfig::default()
        };
        assert!(matches!(
            service.start_monitoring("c-1", Some(config)).await,
            Err(CampaignError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_queries_on_unknown_monitor_are_not_found() {
        let (_, _, service) = service_with(campaign(500.0));
        assert!(matches!(
            service.get_performance_snapshot("c-1"),
            Err(CampaignError::NotFound(_))
        ));
        assert!(matches!(service.get_alerts("c-1"), Err(CampaignError::NotFound(_))));
        assert_eq!(service.stop_monitoring("c-1").await, StopOutcome::NotFound);
        assert!(matches!(
            service.start_monitoring("missing", None).await,
            Err(CampaignError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bid_optimization_uses_campaign_rules() {
        let mut expensive = campaign(500.0);
        expensive.platforms[1].performance = PerformanceCounters {
            impressions: 20_000,
            clicks: 400,
            conversions: 4,
            cost: 800.0,
            revenue: 1_000.0,
        };
        let store = Arc::new(InMemoryCampaignStore::new());
        store.insert(expensive);
        let actions = Arc::new(RecordingActionExecutor::new());
        let deps = Collaborators {
            store,
            metrics: Arc::new(InMemoryMetricsSource::new()),
            notifications: Arc::new(RecordingNotificationSink::new()),
            actions: actions.clone(),
        };
        let service = AutopilotService::new(deps, BudgetRules::default(), MonitorConfig::default());

        // Thin data: the default gates keep the decrease as a recommendation.
        let held = service.optimize_bids("c-1", BidOptions::default()).await.unwrap();
        assert_eq!(held.recommendations.len(), 1);
        assert!(held.executed.is_empty());

        let mut rules = BudgetRules::default();
        rules.bidding.medium_priority_confidence = 0.0;
        service.set_budget_rules("c-1", rules).unwrap();
        let applied = service.optimize_bids("c-1", BidOptions::default()).await.unwrap();
        assert_eq!(applied.executed.len(), 1);

        let invoked = actions.invoked();
        assert_eq!(invoked.len(), 1);
        assert_eq!(invoked[0].platform.as_deref(), Some("linkedin_ads"));
        assert!(invoked[0].bid_adjustment.unwrap() < 0.0);

        assert!(matches!(
            service.optimize_bids("missing", BidOptions::default()).await,
            Err(CampaignError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_budget_rules_are_per_campaign() {
        let (_, _, service) = service_with(campaign(500.0));
        let mut rules = BudgetRules::default();
        rules.safety.require_approval = 250.0;
        service.set_budget_rules("c-1", rules).unwrap();

        assert_eq!(service.budget_rules("c-1").safety.require_approval, 250.0);
        assert_eq!(service.budget_rules("c-2").safety.require_approval, 1_000.0);

        let mut invalid = BudgetRules::default();
        invalid.rebalancing.noise_floor = -1.0;
        invalid.platforms.values_mut().for_each(|p| p.increment_step = 0.0);
        assert!(service.set_budget_rules("c-1", invalid).is_err());
    }
}
