//! Per-campaign monitor: state, the tick pipeline, and the background task
//! that drives it.

use crate::anomaly::{AnomalyDetector, Deviations};
use crate::baseline::Baseline;
use crate::trends::{TrendHistory, TrendPoint, TrendSummary};
use campaign_budget::PerformanceScorer;
use campaign_core::ports::{
    call_with_timeout, ActionExecutor, CampaignStore, MetricsSource, NotificationSink,
};
use campaign_core::rules::{MonitorConfig, ScoringTargets};
use campaign_core::types::{ActionRequest, Alert, AlertSeverity, AutomatedAction, MetricsSnapshot};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// External systems a monitor talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn CampaignStore>,
    pub metrics: Arc<dyn MetricsSource>,
    pub notifications: Arc<dyn NotificationSink>,
    pub actions: Arc<dyn ActionExecutor>,
}

// ─── State ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MonitorState {
    pub campaign_id: String,
    pub config: MonitorConfig,
    pub baseline: Option<Baseline>,
    /// Why the last baseline attempt failed, while no baseline exists.
    pub baseline_error: Option<String>,
    pub current: Option<MetricsSnapshot>,
    /// Performance score of `current` against the campaign's targets.
    pub performance_score: Option<f64>,
    pub trends: TrendHistory,
    pub alerts: VecDeque<Alert>,
    pub started_at: DateTime<Utc>,
    pub last_tick: Option<DateTime<Utc>>,
    pub tick_count: u64,
}

impl MonitorState {
    pub fn new(campaign_id: &str, config: MonitorConfig) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            alerts: VecDeque::with_capacity(config.alert_history_limit),
            config,
            baseline: None,
            baseline_error: None,
            current: None,
            performance_score: None,
            trends: TrendHistory::new(),
            started_at: Utc::now(),
            last_tick: None,
            tick_count: 0,
        }
    }

    /// Append to the ring buffer, evicting the oldest alerts past the limit.
    pub fn push_alerts(&mut self, alerts: &[Alert]) {
        self.alerts.extend(alerts.iter().cloned());
        while self.alerts.len() > self.config.alert_history_limit {
            self.alerts.pop_front();
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> PerformanceSnapshot {
        let window = self.config.active_alert_window();
        let health_score = match (&self.current, &self.baseline) {
            (Some(current), Some(baseline)) => {
                Some(Deviations::between(current, baseline).health_score())
            }
            _ => None,
        };

        PerformanceSnapshot {
            campaign_id: self.campaign_id.clone(),
            current: self.current.clone(),
            baseline: self.baseline.clone(),
            insufficient_data: self.baseline.is_none(),
            baseline_error: self.baseline_error.clone(),
            trends: self.trends.summary(&self.config.thresholds.analysis),
            health_score,
            performance_score: self.performance_score,
            active_alerts: self
                .alerts
                .iter()
                .filter(|a| now - a.triggered_at < window)
                .cloned()
                .collect(),
            tick_count: self.tick_count,
            last_tick: self.last_tick,
            started_at: self.started_at,
        }
    }
}

/// Read-only view of a monitor returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub campaign_id: String,
    pub current: Option<MetricsSnapshot>,
    pub baseline: Option<Baseline>,
    pub insufficient_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_error: Option<String>,
    pub trends: TrendSummary,
    /// Deviation health score, 0–100.
    pub health_score: Option<f64>,
    pub performance_score: Option<f64>,
    pub active_alerts: Vec<Alert>,
    pub tick_count: u64,
    pub last_tick: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub alerts: usize,
    pub actions_invoked: usize,
    pub actions_failed: usize,
    pub baseline_ready: bool,
}

// ─── Monitor ────────────────────────────────────────────────────────────

pub struct CampaignMonitor {
    campaign_id: String,
    config: MonitorConfig,
    detector: AnomalyDetector,
    scorer: PerformanceScorer,
    deps: Collaborators,
    state: Arc<RwLock<MonitorState>>,
}

impl CampaignMonitor {
    pub fn new(
        campaign_id: &str,
        config: MonitorConfig,
        targets: ScoringTargets,
        deps: Collaborators,
    ) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            detector: AnomalyDetector::new(&config.thresholds),
            scorer: PerformanceScorer::new(targets),
            state: Arc::new(RwLock::new(MonitorState::new(campaign_id, config.clone()))),
            config,
            deps,
        }
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn state(&self) -> Arc<RwLock<MonitorState>> {
        self.state.clone()
    }

    /// Rebuild the baseline from the long-term history window. On failure
    /// the previous baseline (if any) stays in place.
    pub async fn refresh_baseline(&self) -> CampaignResult<()> {
        let timeout = self.config.external_timeout();
        let analysis = &self.config.thresholds.analysis;

        let result = async {
            let history = call_with_timeout(
                timeout,
                "fetch_historical_metrics",
                self.deps
                    .metrics
                    .fetch_historical_metrics(&self.campaign_id, analysis.long_term()),
            )
            .await?;
            let campaign = call_with_timeout(
                timeout,
                "get_campaign",
                self.deps.store.get_campaign(&self.campaign_id),
            )
            .await?
            .ok_or_else(|| CampaignError::not_found(format!("campaign {}", self.campaign_id)))?;

            Baseline::from_history(&history, campaign.daily_budget, analysis.data_points_required)
        }
        .await;

        let mut state = self.state.write();
        match result {
            Ok(baseline) => {
                info!(
                    campaign_id = %self.campaign_id,
                    avg_roas = baseline.avg_roas,
                    samples = baseline.sample_count,
                    "Baseline established"
                );
                state.baseline = Some(baseline);
                state.baseline_error = None;
                Ok(())
            }
            Err(e) => {
                warn!(campaign_id = %self.campaign_id, error = %e, "Baseline not established");
                if state.baseline.is_none() {
                    state.baseline_error = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    fn needs_baseline(&self, now: DateTime<Utc>) -> bool {
        let max_age = self.config.baseline_max_age();
        match &self.state.read().baseline {
            Some(baseline) => baseline.is_stale(now, max_age),
            None => true,
        }
    }

    /// One monitoring pass: snapshot, analysis, alerts, mitigations, trends.
    pub async fn tick(&self) -> CampaignResult<TickReport> {
        let now = Utc::now();
        metrics::counter!("monitor.ticks").increment(1);

        if self.needs_baseline(now) {
            // Insufficient history is retried on the next tick.
            let _ = self.refresh_baseline().await;
        }

        let snapshot = call_with_timeout(
            self.config.external_timeout(),
            "fetch_current_metrics",
            self.deps.metrics.fetch_current_metrics(&self.campaign_id),
        )
        .await;
        let snapshot = match snapshot {
            Ok(s) => s,
            Err(e) => {
                metrics::counter!("monitor.external_failures").increment(1);
                self.state.write().last_tick = Some(now);
                return Err(e);
            }
        };

        let score = self.scorer.score(&snapshot.counters);
        let (alerts, baseline_ready) = {
            let mut state = self.state.write();
            let alerts = match &state.baseline {
                Some(baseline) => self.detector.detect(&self.campaign_id, &snapshot, baseline),
                None => Vec::new(),
            };
            state.push_alerts(&alerts);
            state.current = Some(snapshot.clone());
            state.performance_score = Some(score);
            state.last_tick = Some(now);
            state.tick_count += 1;
            (alerts, state.baseline.is_some())
        };

        let mut report = TickReport {
            alerts: alerts.len(),
            baseline_ready,
            ..TickReport::default()
        };

        for alert in &alerts {
            metrics::counter!("monitor.alerts").increment(1);
            let delivered = call_with_timeout(
                self.config.external_timeout(),
                "push_alert",
                self.deps.notifications.push_alert(alert),
            )
            .await;
            if let Err(e) = delivered {
                metrics::counter!("monitor.external_failures").increment(1);
                warn!(
                    campaign_id = %self.campaign_id,
                    alert_id = %alert.id,
                    error = %e,
                    "Alert delivery failed"
                );
            }
        }

        for alert in alerts.iter().filter(|a| a.severity == AlertSeverity::Critical) {
            let Some(action) = alert.automated_action else {
                continue;
            };
            match self.invoke(action, alert).await {
                Ok(()) => report.actions_invoked += 1,
                Err(e) => {
                    report.actions_failed += 1;
                    metrics::counter!("monitor.external_failures").increment(1);
                    warn!(
                        campaign_id = %self.campaign_id,
                        action = %action,
                        error = %e,
                        "Automated action failed"
                    );
                }
            }
        }

        self.state.write().trends.record(
            TrendPoint::from(&snapshot),
            now,
            &self.config.thresholds.analysis,
        );

        debug!(
            campaign_id = %self.campaign_id,
            score,
            alerts = report.alerts,
            actions = report.actions_invoked,
            "Monitor tick complete"
        );
        Ok(report)
    }

    async fn invoke(&self, action: AutomatedAction, alert: &Alert) -> CampaignResult<()> {
        let request = ActionRequest {
            campaign_id: self.campaign_id.clone(),
            action,
            alert_id: Some(alert.id),
            platform: None,
            bid_adjustment: (action == AutomatedAction::ReduceBids)
                .then_some(-self.config.bid_reduction),
        };
        call_with_timeout(
            self.config.external_timeout(),
            "invoke_action",
            self.deps.actions.invoke_action(&request),
        )
        .await?;
        info!(campaign_id = %self.campaign_id, action = %action, "Automated action executed");
        Ok(())
    }

    /// Run ticks on the configured interval until `shutdown` flips or its
    /// sender is dropped. The first tick fires one interval after spawn.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.interval();
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                campaign_id = %self.campaign_id,
                interval_ms = self.config.interval_ms,
                "Monitor started"
            );

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            warn!(
                                campaign_id = %self.campaign_id,
                                error = %e,
                                "Monitor tick failed"
                            );
                        }
                    }
                }
            }

            info!(campaign_id = %self.campaign_id, "Monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::memory::{
        InMemoryCampaignStore, InMemoryMetricsSource, RecordingActionExecutor,
        RecordingNotificationSink,
    };
    use campaign_core::types::{
        AlertMetric, Campaign, CampaignStatus, ChannelStatus, PerformanceCounters, PlatformChannel,
    };

    struct Fixture {
        metrics: Arc<InMemoryMetricsSource>,
        sink: Arc<RecordingNotificationSink>,
        actions: Arc<RecordingActionExecutor>,
        deps: Collaborators,
    }

    fn counters(roas: f64) -> PerformanceCounters {
        PerformanceCounters {
            impressions: 10_000,
            clicks: 250,
            conversions: 8,
            cost: 100.0,
            revenue: 100.0 * roas,
        }
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryCampaignStore::new());
        store.insert(Campaign {
            id: "c-1".into(),
            name: "Alumni".into(),
            // No daily budget keeps pacing out of these tests.
            daily_budget: 0.0,
            status: CampaignStatus::Active,
            platforms: vec![PlatformChannel {
                platform: "google_ads".into(),
                daily_budget: 0.0,
                status: ChannelStatus::Active,
                performance: PerformanceCounters::default(),
            }],
            budget_history: Vec::new(),
        });

        let metrics = Arc::new(InMemoryMetricsSource::new());
        let now = Utc::now();
        metrics.set_history(
            "c-1",
            (1..=12)
                .map(|h| {
                    MetricsSnapshot::new("all", now - chrono::Duration::hours(h), counters(4.0))
                })
                .collect(),
        );

        let sink = Arc::new(RecordingNotificationSink::new());
        let actions = Arc::new(RecordingActionExecutor::new());
        let deps = Collaborators {
            store,
            metrics: metrics.clone(),
            notifications: sink.clone(),
            actions: actions.clone(),
        };
        Fixture { metrics, sink, actions, deps }
    }

    fn monitor(deps: Collaborators, config: MonitorConfig) -> CampaignMonitor {
        CampaignMonitor::new("c-1", config, ScoringTargets::default(), deps)
    }

    #[tokio::test]
    async fn test_tick_raises_alert_and_invokes_action() {
        let f = fixture();
        f.metrics.set_current("c-1", MetricsSnapshot::new("all", Utc::now(), counters(2.6)));
        let monitor = monitor(f.deps.clone(), MonitorConfig::default());

        let report = monitor.tick().await.unwrap();
        assert!(report.baseline_ready);
        assert_eq!(report.alerts, 1);
        assert_eq!(report.actions_invoked, 1);

        let delivered = f.sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].metric, AlertMetric::Roas);
        let invoked = f.actions.invoked();
        assert_eq!(invoked[0].action, AutomatedAction::PauseLowPerformers);
        assert_eq!(invoked[0].alert_id, Some(delivered[0].id));

        let snapshot = monitor.state().read().snapshot(Utc::now());
        assert_eq!(snapshot.active_alerts.len(), 1);
        assert_eq!(snapshot.tick_count, 1);
        assert!(!snapshot.insufficient_data);
        assert!((snapshot.health_score.unwrap() - 65.0).abs() < 1e-6);
        assert_eq!(monitor.state().read().trends.short_term().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_action_does_not_fail_tick() {
        let f = fixture();
        f.actions.fail_action(AutomatedAction::PauseLowPerformers);
        f.metrics.set_current("c-1", MetricsSnapshot::new("all", Utc::now(), counters(2.0)));
        let monitor = monitor(f.deps.clone(), MonitorConfig::default());

        let report = monitor.tick().await.unwrap();
        assert_eq!(report.actions_failed, 1);
        assert_eq!(report.actions_invoked, 0);
        assert_eq!(monitor.state().read().alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_alert_ring_buffer_is_bounded() {
        let f = fixture();
        f.metrics.set_current("c-1", MetricsSnapshot::new("all", Utc::now(), counters(2.6)));
        let config = MonitorConfig {
            alert_history_limit: 3,
            ..MonitorConfig::default()
        };
        let monitor = monitor(f.deps.clone(), config);

        for _ in 0..5 {
            monitor.tick().await.unwrap();
        }
        let state = monitor.state();
        let state = state.read();
        assert_eq!(state.alerts.len(), 3);
        assert_eq!(state.tick_count, 5);
    }

    #[tokio::test]
    async fn test_missing_history_is_retried_each_tick() {
        let f = fixture();
        f.metrics.set_history("c-1", Vec::new());
        f.metrics.set_current("c-1", MetricsSnapshot::new("all", Utc::now(), counters(2.0)));
        let monitor = monitor(f.deps.clone(), MonitorConfig::default());

        assert!(matches!(
            monitor.refresh_baseline().await,
            Err(CampaignError::InsufficientData { available: 0, .. })
        ));
        let report = monitor.tick().await.unwrap();
        assert!(!report.baseline_ready);
        assert_eq!(report.alerts, 0);
        let snapshot = monitor.state().read().snapshot(Utc::now());
        assert!(snapshot.insufficient_data);
        assert!(snapshot.baseline_error.is_some());
        assert!(snapshot.performance_score.is_some());

        // History arrives; the next tick establishes the baseline.
        let now = Utc::now();
        f.metrics.set_history(
            "c-1",
            (1..=10)
                .map(|h| {
                    MetricsSnapshot::new("all", now - chrono::Duration::hours(h), counters(4.0))
                })
                .collect(),
        );
        let report = monitor.tick().await.unwrap();
        assert!(report.baseline_ready);
        assert_eq!(report.alerts, 1);
    }

    #[tokio::test]
    async fn test_metrics_timeout_is_a_soft_failure() {
        let f = fixture();
        f.metrics.set_current("c-1", MetricsSnapshot::new("all", Utc::now(), counters(4.0)));
        let config = MonitorConfig {
            external_timeout_ms: 20,
            ..MonitorConfig::default()
        };
        let monitor = monitor(f.deps.clone(), config);
        monitor.refresh_baseline().await.unwrap();

        f.metrics.set_delay(Some(std::time::Duration::from_millis(200)));
        let result = monitor.tick().await;
        assert!(matches!(result, Err(ref e) if e.is_external()));
        assert_eq!(monitor.state().read().tick_count, 0);
        assert!(monitor.state().read().baseline.is_some());
    }

    #[tokio::test]
    async fn test_spawned_task_ticks_and_stops() {
        let f = fixture();
        f.metrics.set_current("c-1", MetricsSnapshot::new("all", Utc::now(), counters(4.0)));
        let config = MonitorConfig {
            interval_ms: 10,
            ..MonitorConfig::default()
        };
        let monitor = Arc::new(monitor(f.deps.clone(), config));
        let (tx, rx) = watch::channel(false);
        let handle = monitor.clone().spawn(rx);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let ticks = monitor.state().read().tick_count;
        assert!(ticks >= 1);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(monitor.state().read().tick_count, ticks);
    }
}
