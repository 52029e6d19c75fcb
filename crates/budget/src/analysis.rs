//! Budget allocation analysis for one campaign: current split, optimal
//! split, recommendations, expected impact, and a confidence score.

use crate::impact::{ExpectedImpact, PlannedBudget};
use crate::optimizer::{AllocationOptimizer, OptimalAllocation, PlatformAllocationState};
use crate::recommendations::{Recommendation, RecommendationEngine};
use crate::scorer::PerformanceScorer;
use campaign_core::rules::BudgetRules;
use campaign_core::types::{safe_ratio, Campaign};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSummary {
    pub platform: String,
    pub budget: f64,
    pub percentage: f64,
    pub roas: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentAllocation {
    pub total_budget: f64,
    /// Budget the optimizer may distribute after the spend cap and reserve.
    pub spendable_budget: f64,
    pub platforms: Vec<PlatformSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimalPlan {
    pub allocation: Vec<OptimalAllocation>,
    pub reasoning: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationAnalysis {
    pub campaign_id: String,
    pub current: CurrentAllocation,
    pub optimal: OptimalPlan,
    pub recommendations: Vec<Recommendation>,
    pub expected_impact: ExpectedImpact,
    /// 0–100 confidence in the recommendations given data volume.
    pub confidence: f64,
    /// Per-platform evaluation the analysis was built from.
    #[serde(skip)]
    pub platforms: Vec<PlatformAllocationState>,
    pub analyzed_at: DateTime<Utc>,
}

/// Score every active platform of a campaign.
pub fn platform_states(campaign: &Campaign, rules: &BudgetRules) -> Vec<PlatformAllocationState> {
    let scorer = PerformanceScorer::new(rules.targets);
    campaign
        .active_platforms()
        .map(|channel| {
            let perf = &channel.performance;
            PlatformAllocationState {
                platform: channel.platform.clone(),
                current_budget: channel.daily_budget,
                score: scorer.score(perf),
                roas: perf.roas(),
                ctr: perf.ctr(),
                conversion_rate: perf.conversion_rate(),
                cpa: perf.cpa(),
                spend: perf.cost,
                revenue: perf.revenue,
                impressions: perf.impressions,
                conversions: perf.conversions,
            }
        })
        .collect()
}

/// Run the full scorer → optimizer → recommendation pass.
pub fn analyze(campaign: &Campaign, rules: &BudgetRules) -> AllocationAnalysis {
    let platforms = platform_states(campaign, rules);
    let spendable = rules.spendable_budget(campaign.daily_budget);

    let allocation = AllocationOptimizer::new(rules).optimize(&platforms, spendable);
    let recommendations =
        RecommendationEngine::new(&rules.rebalancing).recommend(&platforms, &allocation);

    let plan: Vec<PlannedBudget<'_>> = recommendations
        .iter()
        .map(|r| PlannedBudget {
            platform: &r.platform,
            budget: r.recommended_budget,
            expected_roas: r.expected_roas,
        })
        .collect();
    let expected_impact = ExpectedImpact::compute(&platforms, &plan);

    let current = CurrentAllocation {
        total_budget: campaign.daily_budget,
        spendable_budget: spendable,
        platforms: platforms
            .iter()
            .map(|p| PlatformSummary {
                platform: p.platform.clone(),
                budget: p.current_budget,
                percentage: safe_ratio(p.current_budget, campaign.daily_budget) * 100.0,
                roas: p.roas,
                score: p.score,
            })
            .collect(),
    };

    AllocationAnalysis {
        campaign_id: campaign.id.clone(),
        current,
        optimal: OptimalPlan {
            reasoning: allocation_reasoning(&platforms, &allocation, rules),
            allocation,
        },
        recommendations,
        expected_impact,
        confidence: confidence_score(&platforms),
        platforms,
        analyzed_at: Utc::now(),
    }
}

fn allocation_reasoning(
    platforms: &[PlatformAllocationState],
    allocation: &[OptimalAllocation],
    rules: &BudgetRules,
) -> Vec<String> {
    allocation
        .iter()
        .filter_map(|a| {
            let p = platforms.iter().find(|p| p.platform == a.platform)?;
            let mut reason = format!("{}: ", a.platform);
            if p.roas > rules.targets.roas {
                reason.push_str(&format!(
                    "Exceeding target ROAS ({:.2} vs {:.2}). ",
                    p.roas, rules.targets.roas
                ));
            }
            if p.score > 80.0 {
                reason.push_str("High performance score. ");
            } else if p.score < 50.0 {
                reason.push_str("Low performance - limited budget allocation. ");
            }
            Some(reason.trim_end().to_string())
        })
        .collect()
}

/// Confidence drops with thin impression/conversion volume and with a
/// single platform to compare against.
pub fn confidence_score(platforms: &[PlatformAllocationState]) -> f64 {
    let mut confidence: f64 = 85.0;

    let impressions: u64 = platforms.iter().map(|p| p.impressions).sum();
    if impressions < 10_000 {
        confidence -= 20.0;
    }
    if impressions < 5_000 {
        confidence -= 30.0;
    }

    let conversions: u64 = platforms.iter().map(|p| p.conversions).sum();
    if conversions < 50 {
        confidence -= 15.0;
    }
    if conversions < 20 {
        confidence -= 25.0;
    }

    if platforms.len() == 1 {
        confidence -= 10.0;
    }

    confidence.clamp(0.0, 100.0)
}
