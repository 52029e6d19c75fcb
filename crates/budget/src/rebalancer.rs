//! Safety-gated rebalance executor.
//!
//! Recomputes recommendations on every call and applies the small ones
//! through the campaign store. Large changes wait in an approval queue.
//! Every rebalance of a campaign runs under that campaign's lock, and a
//! successful live rebalance starts a cooldown.

use crate::analysis::{analyze, AllocationAnalysis};
use crate::impact::{ExpectedImpact, PlannedBudget};
use crate::recommendations::{Priority, Recommendation};
use campaign_core::ports::{call_with_timeout, CampaignStore};
use campaign_core::rules::BudgetRules;
use campaign_core::types::{BudgetAction, BudgetChange, Campaign};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

// ─── Types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RebalanceOptions {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Success,
    Failed,
}

/// Outcome of one attempted budget change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedChange {
    pub platform: String,
    pub action: BudgetAction,
    pub previous_budget: f64,
    pub new_budget: f64,
    pub reason: String,
    pub status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl ExecutedChange {
    pub fn succeeded(&self) -> bool {
        self.status == ChangeStatus::Success
    }
}

/// A change that was not applied: either waiting for approval, or a
/// dry-run preview of what would have been applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: Uuid,
    pub campaign_id: String,
    pub platform: String,
    pub action: BudgetAction,
    pub current_budget: f64,
    pub recommended_budget: f64,
    pub reason: String,
    pub priority: Priority,
    pub expected_roas: f64,
    pub requires_approval: bool,
    pub approval_threshold: f64,
    pub created_at: DateTime<Utc>,
}

impl PendingChange {
    fn from_recommendation(
        campaign_id: &str,
        rec: &Recommendation,
        recommended_budget: f64,
        requires_approval: bool,
        approval_threshold: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id: campaign_id.to_string(),
            platform: rec.platform.clone(),
            action: rec.action,
            current_budget: rec.current_budget,
            recommended_budget,
            reason: rec.reason.clone(),
            priority: rec.priority,
            expected_roas: rec.expected_roas,
            requires_approval,
            approval_threshold,
            created_at: Utc::now(),
        }
    }

    pub fn delta(&self) -> f64 {
        self.recommended_budget - self.current_budget
    }

    fn to_budget_change(&self, new_budget: f64) -> BudgetChange {
        BudgetChange {
            platform: self.platform.clone(),
            action: self.action,
            previous_budget: self.current_budget,
            new_budget,
            reason: self.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceExecution {
    pub id: Uuid,
    pub campaign_id: String,
    pub dry_run: bool,
    pub executed: Vec<ExecutedChange>,
    pub pending: Vec<PendingChange>,
    pub total_budget_before: f64,
    pub total_budget_after: f64,
    pub expected_impact: ExpectedImpact,
    pub executed_at: DateTime<Utc>,
}

impl RebalanceExecution {
    pub fn successful_changes(&self) -> usize {
        self.executed.iter().filter(|c| c.succeeded()).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Applied { change: ExecutedChange },
    Rejected { change: PendingChange },
}

// ─── Safety envelope ────────────────────────────────────────────────────

/// Tracks the projected platform total during one rebalance and admits
/// budget targets that keep it under the campaign's spend limit.
#[derive(Debug, Clone, Copy)]
pub struct SafetyEnvelope {
    limit: f64,
    projected: f64,
}

impl SafetyEnvelope {
    /// `min(max_daily_spend, daily_budget - min_reserve)`, starting from the
    /// campaign's currently allocated total.
    pub fn for_campaign(campaign: &Campaign, rules: &BudgetRules) -> Self {
        let limit = rules
            .safety
            .max_daily_spend
            .min(campaign.daily_budget - rules.safety.min_reserve)
            .max(0.0);
        Self {
            limit,
            projected: campaign.allocated_budget(),
        }
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn projected(&self) -> f64 {
        self.projected
    }

    /// Budget that may be set for a platform currently at `current`.
    /// Decreases always pass; increases are capped to the remaining
    /// headroom, floored to whole dollars.
    pub fn admit(&self, current: f64, target: f64) -> Result<f64, String> {
        if target <= current {
            return Ok(target);
        }
        let headroom = self.limit - self.projected;
        if headroom <= 0.0 {
            return Err(format!(
                "no headroom under daily spend limit {:.2} (projected {:.2})",
                self.limit, self.projected
            ));
        }
        if target - current <= headroom {
            return Ok(target);
        }
        let capped = (current + headroom).floor();
        if capped <= current {
            return Err(format!(
                "headroom {headroom:.2} under daily spend limit {:.2} is below one dollar",
                self.limit
            ));
        }
        Ok(capped)
    }

    pub fn record(&mut self, current: f64, new_budget: f64) {
        self.projected += new_budget - current;
    }
}

// ─── Executor ───────────────────────────────────────────────────────────

pub struct RebalanceExecutor {
    store: Arc<dyn CampaignStore>,
    timeout: Duration,
    last_rebalance: DashMap<String, DateTime<Utc>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    approvals: DashMap<Uuid, PendingChange>,
}

impl RebalanceExecutor {
    pub fn new(store: Arc<dyn CampaignStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            last_rebalance: DashMap::new(),
            locks: DashMap::new(),
            approvals: DashMap::new(),
        }
    }

    /// Fresh allocation analysis for a campaign.
    pub async fn analyze(
        &self,
        campaign_id: &str,
        rules: &BudgetRules,
    ) -> CampaignResult<AllocationAnalysis> {
        let campaign = self.load_campaign(campaign_id).await?;
        Ok(analyze(&campaign, rules))
    }

    pub fn last_rebalance(&self, campaign_id: &str) -> Option<DateTime<Utc>> {
        self.last_rebalance.get(campaign_id).map(|t| *t)
    }

    pub fn pending_change(&self, change_id: Uuid) -> Option<PendingChange> {
        self.approvals.get(&change_id).map(|p| p.clone())
    }

    pub fn pending_for(&self, campaign_id: &str) -> Vec<PendingChange> {
        let mut pending: Vec<PendingChange> = self
            .approvals
            .iter()
            .filter(|p| p.campaign_id == campaign_id)
            .map(|p| p.clone())
            .collect();
        pending.sort_by_key(|p| p.created_at);
        pending
    }

    pub async fn execute(
        &self,
        campaign_id: &str,
        rules: &BudgetRules,
        options: RebalanceOptions,
    ) -> CampaignResult<RebalanceExecution> {
        let lock = self.lock_for(campaign_id);
        let result = {
            let _guard = lock.lock().await;
            self.rebalance_locked(campaign_id, rules, options).await
        };
        self.release_lock(campaign_id, lock);
        result
    }

    async fn rebalance_locked(
        &self,
        campaign_id: &str,
        rules: &BudgetRules,
        options: RebalanceOptions,
    ) -> CampaignResult<RebalanceExecution> {
        self.check_cooldown(campaign_id, rules)?;

        let campaign = self.load_campaign(campaign_id).await?;
        let analysis = analyze(&campaign, rules);
        let threshold = rules.safety.require_approval;
        let mut envelope = SafetyEnvelope::for_campaign(&campaign, rules);

        // Releases run first so increases can use the freed headroom.
        let (auto, gated): (Vec<&Recommendation>, Vec<&Recommendation>) = analysis
            .recommendations
            .iter()
            .partition(|r| r.delta().abs() < threshold);
        let mut ordered = auto;
        ordered.sort_by_key(|r| r.delta() > 0.0);

        let mut executed = Vec::new();
        let mut pending = Vec::new();
        let mut plan = Vec::new();

        for rec in ordered {
            let admitted = envelope.admit(rec.current_budget, rec.recommended_budget);

            if options.dry_run {
                match admitted {
                    Ok(budget) => {
                        envelope.record(rec.current_budget, budget);
                        plan.push((rec.platform.clone(), budget, rec.expected_roas));
                        pending.push(PendingChange::from_recommendation(
                            campaign_id,
                            rec,
                            budget,
                            false,
                            threshold,
                        ));
                    }
                    Err(reason) => {
                        executed.push(failed_change(rec, rec.recommended_budget, reason))
                    }
                }
                continue;
            }

            let budget = match admitted {
                Ok(budget) => budget,
                Err(reason) => {
                    warn!(
                        campaign_id,
                        platform = %rec.platform,
                        %reason,
                        "Budget increase rejected"
                    );
                    metrics::counter!("rebalance.rejected").increment(1);
                    executed.push(failed_change(rec, rec.recommended_budget, reason));
                    continue;
                }
            };

            let change = BudgetChange {
                platform: rec.platform.clone(),
                action: rec.action,
                previous_budget: rec.current_budget,
                new_budget: budget,
                reason: rec.reason.clone(),
            };
            match self.apply(campaign_id, &change).await {
                Ok(applied) => {
                    envelope.record(rec.current_budget, budget);
                    plan.push((rec.platform.clone(), budget, rec.expected_roas));
                    executed.push(applied);
                }
                Err(e) => {
                    warn!(
                        campaign_id,
                        platform = %rec.platform,
                        error = %e,
                        "Budget change failed"
                    );
                    metrics::counter!("rebalance.change_failures").increment(1);
                    executed.push(failed_change(rec, budget, e.to_string()));
                }
            }
        }

        if !options.dry_run {
            // A new live run supersedes anything still waiting from the last one.
            self.approvals.retain(|_, p| p.campaign_id != campaign_id);
        }
        for rec in gated {
            let change = PendingChange::from_recommendation(
                campaign_id,
                rec,
                rec.recommended_budget,
                true,
                threshold,
            );
            if !options.dry_run {
                self.approvals.insert(change.id, change.clone());
            }
            pending.push(change);
        }

        let planned: Vec<PlannedBudget<'_>> = plan
            .iter()
            .map(|(platform, budget, expected_roas)| PlannedBudget {
                platform,
                budget: *budget,
                expected_roas: *expected_roas,
            })
            .collect();
        let expected_impact = ExpectedImpact::compute(&analysis.platforms, &planned);

        let execution = RebalanceExecution {
            id: Uuid::new_v4(),
            campaign_id: campaign_id.to_string(),
            dry_run: options.dry_run,
            total_budget_before: campaign.allocated_budget(),
            total_budget_after: envelope.projected(),
            executed,
            pending,
            expected_impact,
            executed_at: Utc::now(),
        };

        if !options.dry_run && execution.successful_changes() > 0 {
            self.last_rebalance.insert(campaign_id.to_string(), execution.executed_at);
            metrics::counter!("rebalance.executed").increment(1);
        }

        info!(
            campaign_id,
            dry_run = options.dry_run,
            executed = execution.executed.len(),
            succeeded = execution.successful_changes(),
            pending = execution.pending.len(),
            budget_before = execution.total_budget_before,
            budget_after = execution.total_budget_after,
            "Rebalance finished"
        );

        Ok(execution)
    }

    /// Apply or discard a change from the approval queue. Approved changes
    /// still go through the safety envelope, but not the approval threshold.
    pub async fn approve_pending_change(
        &self,
        change_id: Uuid,
        approved: bool,
        rules: &BudgetRules,
    ) -> CampaignResult<ApprovalOutcome> {
        let campaign_id = self
            .approvals
            .get(&change_id)
            .map(|p| p.campaign_id.clone())
            .ok_or_else(|| CampaignError::not_found(format!("pending change {change_id}")))?;

        let lock = self.lock_for(&campaign_id);
        let result = {
            let _guard = lock.lock().await;
            self.approve_locked(change_id, approved, rules, &campaign_id).await
        };
        self.release_lock(&campaign_id, lock);
        result
    }

    async fn approve_locked(
        &self,
        change_id: Uuid,
        approved: bool,
        rules: &BudgetRules,
        campaign_id: &str,
    ) -> CampaignResult<ApprovalOutcome> {
        // A concurrent rebalance may have superseded it while we waited.
        let (_, pending) = self
            .approvals
            .remove(&change_id)
            .ok_or_else(|| CampaignError::not_found(format!("pending change {change_id}")))?;

        if !approved {
            info!(
                campaign_id = %pending.campaign_id,
                change_id = %change_id,
                "Pending change rejected"
            );
            return Ok(ApprovalOutcome::Rejected { change: pending });
        }

        let campaign = self.load_campaign(campaign_id).await?;
        let current = campaign
            .platform(&pending.platform)
            .map(|p| p.daily_budget)
            .unwrap_or(pending.current_budget);
        let envelope = SafetyEnvelope::for_campaign(&campaign, rules);

        let outcome = match envelope.admit(current, pending.recommended_budget) {
            Ok(budget) => {
                let mut change = pending.to_budget_change(budget);
                change.previous_budget = current;
                match self.apply(campaign_id, &change).await {
                    Ok(applied) => {
                        self.last_rebalance
                            .insert(campaign_id.to_string(), applied.executed_at);
                        applied
                    }
                    Err(e) => {
                        warn!(
                            campaign_id = %campaign_id,
                            change_id = %change_id,
                            error = %e,
                            "Approved change failed"
                        );
                        metrics::counter!("rebalance.change_failures").increment(1);
                        failed_pending(&pending, current, budget, e.to_string())
                    }
                }
            }
            Err(reason) => failed_pending(&pending, current, pending.recommended_budget, reason),
        };

        info!(
            campaign_id = %campaign_id,
            change_id = %change_id,
            status = ?outcome.status,
            "Pending change approved"
        );
        Ok(ApprovalOutcome::Applied { change: outcome })
    }

    fn lock_for(&self, campaign_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(campaign_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the campaign's lock entry once no other call holds it, so ids
    /// that were only ever looked up do not accumulate.
    fn release_lock(&self, campaign_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(campaign_id, |_, l| Arc::strong_count(l) == 1);
    }

    fn check_cooldown(&self, campaign_id: &str, rules: &BudgetRules) -> CampaignResult<()> {
        if let Some(last) = self.last_rebalance(campaign_id) {
            let next_eligible = last + rules.cooldown();
            if Utc::now() < next_eligible {
                return Err(CampaignError::Cooldown {
                    campaign_id: campaign_id.to_string(),
                    next_eligible,
                });
            }
        }
        Ok(())
    }

    async fn load_campaign(&self, campaign_id: &str) -> CampaignResult<Campaign> {
        call_with_timeout(self.timeout, "get_campaign", self.store.get_campaign(campaign_id))
            .await?
            .ok_or_else(|| CampaignError::not_found(format!("campaign {campaign_id}")))
    }

    async fn apply(
        &self,
        campaign_id: &str,
        change: &BudgetChange,
    ) -> CampaignResult<ExecutedChange> {
        let entry = call_with_timeout(
            self.timeout,
            "apply_budget_change",
            self.store.apply_budget_change(campaign_id, change),
        )
        .await?;

        info!(
            campaign_id,
            platform = %entry.platform,
            action = %entry.action,
            previous_budget = entry.previous_budget,
            new_budget = entry.new_budget,
            "Budget change applied"
        );
        Ok(ExecutedChange {
            platform: entry.platform,
            action: entry.action,
            previous_budget: entry.previous_budget,
            new_budget: entry.new_budget,
            reason: entry.reason,
            status: ChangeStatus::Success,
            error: None,
            executed_at: entry.timestamp,
        })
    }
}

fn failed_change(rec: &Recommendation, new_budget: f64, error: String) -> ExecutedChange {
    ExecutedChange {
        platform: rec.platform.clone(),
        action: rec.action,
        previous_budget: rec.current_budget,
        new_budget,
        reason: rec.reason.clone(),
        status: ChangeStatus::Failed,
        error: Some(error),
        executed_at: Utc::now(),
    }
}

fn failed_pending(
    pending: &PendingChange,
    current: f64,
    new_budget: f64,
    error: String,
) -> ExecutedChange {
    ExecutedChange {
        platform: pending.platform.clone(),
        action: pending.action,
        previous_budget: current,
        new_budget,
        reason: pending.reason.clone(),
        status: ChangeStatus::Failed,
        error: Some(error),
        executed_at: Utc::now(),
    }
}
