//! Recommendation engine — diffs the current allocation against the
//! optimizer's output into ranked, reasoned budget actions.

use crate::optimizer::{OptimalAllocation, PlatformAllocationState};
use campaign_core::rules::RebalancingRules;
use campaign_core::types::{safe_ratio, BudgetAction};
use serde::{Deserialize, Serialize};

/// Ordering is significant: earlier variants rank first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub platform: String,
    pub action: BudgetAction,
    pub current_budget: f64,
    pub recommended_budget: f64,
    /// Signed change in dollars.
    pub change: f64,
    /// Signed change as a percentage of the current budget.
    pub change_pct: f64,
    pub reason: String,
    pub priority: Priority,
    pub expected_roas: f64,
}

impl Recommendation {
    pub fn delta(&self) -> f64 {
        self.recommended_budget - self.current_budget
    }
}

pub struct RecommendationEngine<'a> {
    rules: &'a RebalancingRules,
}

impl<'a> RecommendationEngine<'a> {
    pub fn new(rules: &'a RebalancingRules) -> Self {
        Self { rules }
    }

    /// One recommendation per platform whose optimal budget moved by more
    /// than the noise floor, sorted by priority (stable within a priority).
    pub fn recommend(
        &self,
        platforms: &[PlatformAllocationState],
        optimal: &[OptimalAllocation],
    ) -> Vec<Recommendation> {
        let mut recommendations: Vec<Recommendation> = platforms
            .iter()
            .filter_map(|platform| {
                let target = optimal.iter().find(|a| a.platform == platform.platform)?;
                self.recommend_platform(platform, target.budget)
            })
            .collect();

        recommendations.sort_by_key(|r| r.priority);
        recommendations
    }

    fn recommend_platform(
        &self,
        platform: &PlatformAllocationState,
        optimal_budget: f64,
    ) -> Option<Recommendation> {
        let current = platform.current_budget;
        let difference = optimal_budget - current;
        if difference.abs() <= self.rules.noise_floor {
            return None;
        }

        let size_priority = if difference.abs() > self.rules.high_priority_delta {
            Priority::High
        } else {
            Priority::Medium
        };

        let (action, recommended_budget, reason, priority, expected_roas) =
            if platform.roas < self.rules.emergency_roas {
                (
                    BudgetAction::Pause,
                    0.0,
                    format!(
                        "ROAS ({:.2}) below emergency threshold ({:.2})",
                        platform.roas, self.rules.emergency_roas
                    ),
                    Priority::Critical,
                    0.0,
                )
            } else if difference > 0.0 {
                (
                    BudgetAction::Increase,
                    optimal_budget,
                    format!("High performance (ROAS: {:.2})", platform.roas),
                    size_priority,
                    platform.roas * self.rules.increase_roas_uplift,
                )
            } else {
                (
                    BudgetAction::Decrease,
                    optimal_budget,
                    "Reallocate to better performers".to_string(),
                    size_priority,
                    platform.roas,
                )
            };

        let change = recommended_budget - current;
        Some(Recommendation {
            platform: platform.platform.clone(),
            action,
            current_budget: current,
            recommended_budget,
            change,
            change_pct: safe_ratio(change, current) * 100.0,
            reason,
            priority,
            expected_roas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::PerformerTier;

    fn state(platform: &str, current: f64, roas: f64) -> PlatformAllocationState {
        PlatformAllocationState {
            platform: platform.to_string(),
            current_budget: current,
            score: 70.0,
            roas,
            ctr: 0.0,
            conversion_rate: 0.0,
            cpa: 0.0,
            spend: current,
            revenue: current * roas,
            impressions: 0,
            conversions: 0,
        }
    }

    fn optimal(platform: &str, budget: f64) -> OptimalAllocation {
        OptimalAllocation {
            platform: platform.to_string(),
            budget,
            percentage: 0.0,
            weight: 0.0,
            tier: PerformerTier::TestingPhase,
        }
    }

    #[test]
    fn test_changes_within_noise_floor_are_ignored() {
        let rules = RebalancingRules::default();
        let engine = RecommendationEngine::new(&rules);
        let recs = engine.recommend(
            &[state("google_ads", 300.0, 5.0), state("facebook_ads", 200.0, 1.0)],
            &[optimal("google_ads", 310.0), optimal("facebook_ads", 190.0)],
        );
        assert!(recs.is_empty());
    }

    #[test]
    fn test_emergency_roas_pauses_regardless_of_direction() {
        let rules = RebalancingRules::default();
        let engine = RecommendationEngine::new(&rules);
        let recs = engine.recommend(
            &[state("tiktok_ads", 100.0, 1.2)],
            &[optimal("tiktok_ads", 400.0)],
        );

        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].action, BudgetAction::Pause);
        assert_eq!(recs[0].recommended_budget, 0.0);
        assert_eq!(recs[0].priority, Priority::Critical);
        assert_eq!(recs[0].expected_roas, 0.0);
        assert!((recs[0].change + 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_increase_and_decrease_priorities() {
        let rules = RebalancingRules::default();
        let engine = RecommendationEngine::new(&rules);
        let recs = engine.recommend(
            &[state("google_ads", 300.0, 5.0), state("facebook_ads", 200.0, 2.0)],
            &[optimal("google_ads", 361.0), optimal("facebook_ads", 38.0)],
        );

        assert_eq!(recs.len(), 2);
        // High-priority decrease ranks ahead of the medium increase.
        assert_eq!(recs[0].platform, "facebook_ads");
        assert_eq!(recs[0].action, BudgetAction::Decrease);
        assert_eq!(recs[0].priority, Priority::High);
        assert!((recs[0].expected_roas - 2.0).abs() < 1e-9);

        assert_eq!(recs[1].platform, "google_ads");
        assert_eq!(recs[1].action, BudgetAction::Increase);
        assert_eq!(recs[1].priority, Priority::Medium);
        assert!((recs[1].expected_roas - 5.5).abs() < 1e-9);
        assert!((recs[1].change_pct - 20.333).abs() < 1e-3);
    }

    #[test]
    fn test_sort_is_stable_within_priority() {
        let rules = RebalancingRules::default();
        let engine = RecommendationEngine::new(&rules);
        let recs = engine.recommend(
            &[
                state("google_ads", 100.0, 4.0),
                state("linkedin_ads", 100.0, 1.0),
                state("facebook_ads", 100.0, 4.0),
            ],
            &[
                optimal("google_ads", 150.0),
                optimal("linkedin_ads", 50.0),
                optimal("facebook_ads", 60.0),
            ],
        );
        let order: Vec<&str> = recs.iter().map(|r| r.platform.as_str()).collect();
        assert_eq!(order, vec!["linkedin_ads", "google_ads", "facebook_ads"]);
    }

    #[test]
    fn test_platform_missing_from_optimal_is_skipped() {
        let rules = RebalancingRules::default();
        let engine = RecommendationEngine::new(&rules);
        let recs = engine.recommend(&[state("google_ads", 100.0, 4.0)], &[]);
        assert!(recs.is_empty());
    }
}
