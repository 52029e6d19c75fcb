//! Process-local collaborators backed by `DashMap`.
//!
//! Used by the binary when no external systems are wired in, and by tests.

use crate::error::{CampaignError, CampaignResult};
use crate::ports::{ActionExecutor, CampaignStore, MetricsSource, NotificationSink};
use crate::types::{
    ActionRequest, Alert, AutomatedAction, BudgetAction, BudgetChange, BudgetHistoryEntry,
    Campaign, ChannelStatus, MetricsSnapshot,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{info, warn};

// ─── Campaign store ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryCampaignStore {
    campaigns: DashMap<String, Campaign>,
    failing_platforms: DashSet<String>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, campaign: Campaign) {
        self.campaigns.insert(campaign.id.clone(), campaign);
    }

    pub fn snapshot(&self, campaign_id: &str) -> Option<Campaign> {
        self.campaigns.get(campaign_id).map(|c| c.clone())
    }

    pub fn campaign_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.campaigns.iter().map(|c| c.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Make every budget change for `platform` fail, as an unreachable ad
    /// platform would.
    pub fn fail_platform(&self, platform: &str) {
        self.failing_platforms.insert(platform.to_string());
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn get_campaign(&self, campaign_id: &str) -> CampaignResult<Option<Campaign>> {
        Ok(self.snapshot(campaign_id))
    }

    async fn apply_budget_change(
        &self,
        campaign_id: &str,
        change: &BudgetChange,
    ) -> CampaignResult<BudgetHistoryEntry> {
        if self.failing_platforms.contains(&change.platform) {
            return Err(CampaignError::External(format!(
                "platform {} rejected the budget update",
                change.platform
            )));
        }

        let mut campaign = self
            .campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| CampaignError::not_found(format!("campaign {campaign_id}")))?;

        let channel = campaign
            .platforms
            .iter_mut()
            .find(|p| p.platform == change.platform)
            .ok_or_else(|| {
                CampaignError::not_found(format!(
                    "platform {} on campaign {campaign_id}",
                    change.platform
                ))
            })?;

        channel.daily_budget = change.new_budget;
        if change.action == BudgetAction::Pause {
            channel.status = ChannelStatus::Paused;
        }

        let entry = BudgetHistoryEntry::from_change(change, Utc::now());
        campaign.budget_history.push(entry.clone());
        Ok(entry)
    }
}

// ─── Metrics source ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryMetricsSource {
    current: DashMap<String, MetricsSnapshot>,
    history: DashMap<String, Vec<MetricsSnapshot>>,
    delay: Mutex<Option<Duration>>,
}

impl InMemoryMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current(&self, campaign_id: &str, snapshot: MetricsSnapshot) {
        self.current.insert(campaign_id.to_string(), snapshot);
    }

    pub fn set_history(&self, campaign_id: &str, snapshots: Vec<MetricsSnapshot>) {
        self.history.insert(campaign_id.to_string(), snapshots);
    }

    /// Delay every fetch, to exercise caller timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    async fn maybe_delay(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MetricsSource for InMemoryMetricsSource {
    async fn fetch_current_metrics(&self, campaign_id: &str) -> CampaignResult<MetricsSnapshot> {
        self.maybe_delay().await;
        self.current
            .get(campaign_id)
            .map(|s| s.clone())
            .ok_or_else(|| CampaignError::External(format!("no live metrics for {campaign_id}")))
    }

    async fn fetch_historical_metrics(
        &self,
        campaign_id: &str,
        window: Duration,
    ) -> CampaignResult<Vec<MetricsSnapshot>> {
        self.maybe_delay().await;
        let window = chrono::Duration::from_std(window)
            .map_err(|e| CampaignError::Config(format!("history window out of range: {e}")))?;
        let cutoff = Utc::now() - window;
        Ok(self
            .history
            .get(campaign_id)
            .map(|h| h.iter().filter(|s| s.timestamp >= cutoff).cloned().collect())
            .unwrap_or_default())
    }
}

// ─── Notification sink ──────────────────────────────────────────────────

/// Logs every alert and keeps a copy for inspection.
#[derive(Default)]
pub struct RecordingNotificationSink {
    delivered: Mutex<Vec<Alert>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Alert> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn push_alert(&self, alert: &Alert) -> CampaignResult<()> {
        info!(
            campaign_id = %alert.campaign_id,
            alert_id = %alert.id,
            severity = ?alert.severity,
            metric = ?alert.metric,
            "{}",
            alert.message
        );
        self.delivered.lock().push(alert.clone());
        Ok(())
    }
}

// ─── Action executor ────────────────────────────────────────────────────

/// Logs and records mitigation requests without touching any ad platform.
#[derive(Default)]
pub struct RecordingActionExecutor {
    invoked: Mutex<Vec<ActionRequest>>,
    failing: DashSet<AutomatedAction>,
}

impl RecordingActionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invoked(&self) -> Vec<ActionRequest> {
        self.invoked.lock().clone()
    }

    pub fn fail_action(&self, action: AutomatedAction) {
        self.failing.insert(action);
    }
}

#[async_trait]
impl ActionExecutor for RecordingActionExecutor {
    async fn invoke_action(&self, request: &ActionRequest) -> CampaignResult<()> {
        if self.failing.contains(&request.action) {
            warn!(campaign_id = %request.campaign_id, action = %request.action, "Action rejected");
            return Err(CampaignError::External(format!(
                "{} failed for {}",
                request.action, request.campaign_id
            )));
        }
        info!(
            campaign_id = %request.campaign_id,
            action = %request.action,
            platform = ?request.platform,
            bid_adjustment = ?request.bid_adjustment,
            "Automated action requested"
        );
        self.invoked.lock().push(request.clone());
        Ok(())
    }
}
