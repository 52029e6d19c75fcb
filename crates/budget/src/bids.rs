//! CPA-driven bid optimization.
//!
//! Platforms whose CPA runs well over target get their bids lowered.
//! Platforms well under target get them raised while their impression
//! share is still small. A recommendation only reaches the action
//! executor when the campaign's data confidence clears the gate for its
//! priority.

use crate::analysis::{confidence_score, platform_states};
use crate::optimizer::PlatformAllocationState;
use crate::rebalancer::ChangeStatus;
use crate::recommendations::Priority;
use campaign_core::ports::{call_with_timeout, ActionExecutor};
use campaign_core::rules::{BiddingRules, BudgetRules};
use campaign_core::types::{safe_ratio, ActionRequest, AutomatedAction, Campaign};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

// ─── Types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BidOptions {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidRecommendation {
    pub platform: String,
    /// [`AutomatedAction::ReduceBids`] or [`AutomatedAction::IncreaseBids`].
    pub action: AutomatedAction,
    /// Signed fractional bid change: negative lowers bids.
    pub adjustment: f64,
    /// `None` when the platform has no conversions yet.
    pub cpa: Option<f64>,
    pub impression_share: f64,
    pub reason: String,
    pub priority: Priority,
}

/// Outcome of one bid adjustment handed to the action executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedBidAdjustment {
    pub platform: String,
    pub action: AutomatedAction,
    pub adjustment: f64,
    pub status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidOptimization {
    pub campaign_id: String,
    pub dry_run: bool,
    /// 0–100 confidence in the campaign's data volume.
    pub confidence: f64,
    pub recommendations: Vec<BidRecommendation>,
    pub executed: Vec<ExecutedBidAdjustment>,
    pub evaluated_at: DateTime<Utc>,
}

// ─── Recommendations ────────────────────────────────────────────────────

pub struct BidOptimizer {
    rules: BiddingRules,
    target_cpa: f64,
}

impl BidOptimizer {
    pub fn new(rules: &BudgetRules) -> Self {
        Self {
            rules: rules.bidding,
            target_cpa: rules.targets.cpa,
        }
    }

    pub fn recommend(&self, platforms: &[PlatformAllocationState]) -> Vec<BidRecommendation> {
        let total_impressions: u64 = platforms.iter().map(|p| p.impressions).sum();
        let ceiling = self.target_cpa * self.rules.decrease_cpa_ratio;
        let floor = self.target_cpa * self.rules.increase_cpa_ratio;

        platforms
            .iter()
            .filter_map(|p| {
                let share = safe_ratio(p.impressions as f64, total_impressions as f64);
                let cpa = (p.conversions > 0).then_some(p.cpa);

                let (action, adjustment, reason) = match cpa {
                    // Spend without a single conversion is treated as unbounded CPA.
                    None if p.spend > 0.0 => (
                        AutomatedAction::ReduceBids,
                        -self.rules.adjustment_rate,
                        format!(
                            "No conversions on {:.2} spend against target CPA {:.2}",
                            p.spend, self.target_cpa
                        ),
                    ),
                    Some(cpa) if cpa > ceiling => (
                        AutomatedAction::ReduceBids,
                        -self.rules.adjustment_rate,
                        format!("CPA {:.2} is above target {:.2}", cpa, self.target_cpa),
                    ),
                    Some(cpa) if cpa < floor && share < self.rules.impression_share_target => (
                        AutomatedAction::IncreaseBids,
                        self.rules.adjustment_rate,
                        format!(
                            "CPA {:.2} below target {:.2} with {:.1}% impression share",
                            cpa,
                            self.target_cpa,
                            share * 100.0
                        ),
                    ),
                    _ => return None,
                };

                Some(BidRecommendation {
                    platform: p.platform.clone(),
                    action,
                    adjustment,
                    cpa,
                    impression_share: share,
                    reason,
                    priority: Priority::Medium,
                })
            })
            .collect()
    }
}

/// Whether a recommendation of `priority` may run unattended at
/// `confidence`. Critical shares the high-priority gate.
pub fn should_execute(rules: &BiddingRules, priority: Priority, confidence: f64) -> bool {
    let gate = match priority {
        Priority::Critical | Priority::High => rules.high_priority_confidence,
        Priority::Medium => rules.medium_priority_confidence,
        Priority::Low => rules.low_priority_confidence,
    };
    confidence > gate
}

// ─── Executor ───────────────────────────────────────────────────────────

/// Routes gated bid recommendations through the [`ActionExecutor`].
pub struct BidExecutor {
    actions: Arc<dyn ActionExecutor>,
    timeout: Duration,
}

impl BidExecutor {
    pub fn new(actions: Arc<dyn ActionExecutor>, timeout: Duration) -> Self {
        Self { actions, timeout }
    }

    pub async fn optimize(
        &self,
        campaign: &Campaign,
        rules: &BudgetRules,
        options: BidOptions,
    ) -> BidOptimization {
        let platforms = platform_states(campaign, rules);
        let confidence = confidence_score(&platforms);
        let recommendations = BidOptimizer::new(rules).recommend(&platforms);

        let mut executed = Vec::new();
        if !options.dry_run {
            for rec in recommendations
                .iter()
                .filter(|r| should_execute(&rules.bidding, r.priority, confidence))
            {
                executed.push(self.adjust(&campaign.id, rec).await);
            }
        }

        info!(
            campaign_id = %campaign.id,
            dry_run = options.dry_run,
            confidence,
            recommended = recommendations.len(),
            executed = executed.len(),
            "Bid optimization finished"
        );

        BidOptimization {
            campaign_id: campaign.id.clone(),
            dry_run: options.dry_run,
            confidence,
            recommendations,
            executed,
            evaluated_at: Utc::now(),
        }
    }

    async fn adjust(&self, campaign_id: &str, rec: &BidRecommendation) -> ExecutedBidAdjustment {
        let request = ActionRequest {
            campaign_id: campaign_id.to_string(),
            action: rec.action,
            alert_id: None,
            platform: Some(rec.platform.clone()),
            bid_adjustment: Some(rec.adjustment),
        };
        let result = call_with_timeout(
            self.timeout,
            "invoke_action",
            self.actions.invoke_action(&request),
        )
        .await;

        let (status, error) = match result {
            Ok(()) => {
                metrics::counter!("bids.adjusted").increment(1);
                (ChangeStatus::Success, None)
            }
            Err(e) => {
                warn!(
                    campaign_id,
                    platform = %rec.platform,
                    action = %rec.action,
                    error = %e,
                    "Bid adjustment failed"
                );
                metrics::counter!("bids.adjustment_failures").increment(1);
                (ChangeStatus::Failed, Some(e.to_string()))
            }
        };

        ExecutedBidAdjustment {
            platform: rec.platform.clone(),
            action: rec.action,
            adjustment: rec.adjustment,
            status,
            error,
            executed_at: Utc::now(),
        }
    }
}
