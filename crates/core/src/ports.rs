//! Interfaces of the external collaborators the control loop drives.
//!
//! Implementations live outside this workspace (ad-platform APIs, a
//! database, a push channel); [`crate::memory`] provides process-local ones.

use crate::error::CampaignResult;
use crate::types::{
    ActionRequest, Alert, BudgetChange, BudgetHistoryEntry, Campaign, MetricsSnapshot,
};
use async_trait::async_trait;
use std::time::Duration;

/// Read/write access to campaign records.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn get_campaign(&self, campaign_id: &str) -> CampaignResult<Option<Campaign>>;

    /// Apply a budget change to one platform of a campaign and append the
    /// matching entry to its budget history.
    async fn apply_budget_change(
        &self,
        campaign_id: &str,
        change: &BudgetChange,
    ) -> CampaignResult<BudgetHistoryEntry>;
}

/// Source of live and historical delivery metrics.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch_current_metrics(&self, campaign_id: &str) -> CampaignResult<MetricsSnapshot>;

    async fn fetch_historical_metrics(
        &self,
        campaign_id: &str,
        window: Duration,
    ) -> CampaignResult<Vec<MetricsSnapshot>>;
}

/// Delivery channel for alerts (dashboards, push, email).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn push_alert(&self, alert: &Alert) -> CampaignResult<()>;
}

/// Performs the platform-side effect of an automated mitigation.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn invoke_action(&self, request: &ActionRequest) -> CampaignResult<()>;
}

/// Run a collaborator call with a deadline, mapping expiry to
/// [`CampaignError::Timeout`](crate::CampaignError::Timeout).
pub async fn call_with_timeout<T, F>(timeout: Duration, call: &str, fut: F) -> CampaignResult<T>
where
    F: std::future::Future<Output = CampaignResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(crate::CampaignError::Timeout(
            timeout.as_millis() as u64,
            call.to_string(),
        )),
    }
}
