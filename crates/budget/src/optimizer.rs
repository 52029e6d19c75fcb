//! Allocation optimizer — splits a daily budget across platforms in
//! proportion to squared score times log-ROAS, under per-platform bounds.

use campaign_core::rules::{BudgetRules, PlatformRules};
use campaign_core::types::safe_ratio;
use serde::{Deserialize, Serialize};

const SUM_TOLERANCE: f64 = 1e-6;

/// Evaluated state of one platform for a single allocation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformAllocationState {
    pub platform: String,
    pub current_budget: f64,
    /// 0–100 performance score.
    pub score: f64,
    pub roas: f64,
    pub ctr: f64,
    pub conversion_rate: f64,
    pub cpa: f64,
    pub spend: f64,
    pub revenue: f64,
    pub impressions: u64,
    pub conversions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformerTier {
    HighPerformer,
    ModeratePerformer,
    TestingPhase,
}

impl PerformerTier {
    fn from_weight(weight: f64) -> Self {
        if weight > 0.3 {
            Self::HighPerformer
        } else if weight > 0.1 {
            Self::ModeratePerformer
        } else {
            Self::TestingPhase
        }
    }
}

/// Recommended budget for one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimalAllocation {
    pub platform: String,
    pub budget: f64,
    /// Percentage of the total budget handed to the optimizer.
    pub percentage: f64,
    pub weight: f64,
    pub tier: PerformerTier,
}

/// `(score/100)^2 * ln(max(1, roas))`.
pub fn allocation_weight(score: f64, roas: f64) -> f64 {
    (score / 100.0).powi(2) * roas.max(1.0).ln()
}

pub struct AllocationOptimizer<'a> {
    rules: &'a BudgetRules,
}

impl<'a> AllocationOptimizer<'a> {
    pub fn new(rules: &'a BudgetRules) -> Self {
        Self { rules }
    }

    /// Compute the optimal split of `total_budget`. Output order matches
    /// input order; every budget is either 0 or within its platform bounds
    /// and the sum never exceeds `total_budget`.
    pub fn optimize(
        &self,
        platforms: &[PlatformAllocationState],
        total_budget: f64,
    ) -> Vec<OptimalAllocation> {
        let weights: Vec<f64> = platforms
            .iter()
            .map(|p| allocation_weight(p.score, p.roas))
            .collect();
        let bounds: Vec<PlatformRules> = platforms
            .iter()
            .map(|p| self.rules.rules_for(&p.platform))
            .collect();

        let total = total_budget.max(0.0);
        let single = platforms.len() == 1;
        let mut budgets = if total > 0.0 {
            Self::allocate_weighted(&weights, &bounds, total, single)
        } else {
            vec![0.0; platforms.len()]
        };

        // Zero-weight platforms keep a minimum presence only from leftovers.
        if !single {
            let mut remaining = total - budgets.iter().sum::<f64>();
            for (i, weight) in weights.iter().enumerate() {
                let min = bounds[i].min_daily_budget;
                if *weight <= 0.0 && min > 0.0 && remaining + SUM_TOLERANCE >= min {
                    budgets[i] = min;
                    remaining -= min;
                }
            }
        }

        platforms
            .iter()
            .zip(weights)
            .zip(budgets)
            .map(|((p, weight), budget)| OptimalAllocation {
                platform: p.platform.clone(),
                budget,
                percentage: safe_ratio(budget, total) * 100.0,
                weight,
                tier: PerformerTier::from_weight(weight),
            })
            .collect()
    }

    fn allocate_weighted(
        weights: &[f64],
        bounds: &[PlatformRules],
        total: f64,
        single: bool,
    ) -> Vec<f64> {
        let n = weights.len();
        let mut included: Vec<bool> = weights.iter().map(|w| single || *w > 0.0).collect();

        loop {
            if !included.iter().any(|i| *i) {
                return vec![0.0; n];
            }

            let included_weight: f64 = weights
                .iter()
                .zip(&included)
                .filter(|(_, inc)| **inc)
                .map(|(w, _)| *w)
                .sum();

            let mut budgets = vec![0.0; n];
            for i in (0..n).filter(|i| included[*i]) {
                let share = if single {
                    1.0
                } else {
                    weights[i] / included_weight
                };
                budgets[i] = fit_to_bounds(share * total, &bounds[i]);
            }

            let sum: f64 = budgets.iter().sum();
            if sum <= total + SUM_TOLERANCE {
                return budgets;
            }

            // Uniform shrink, floored to whole dollars so the sum stays under.
            let scale = total / sum;
            let scaled: Vec<f64> = budgets.iter().map(|b| (b * scale).floor()).collect();
            let fits = (0..n)
                .filter(|i| included[*i])
                .all(|i| scaled[i] >= bounds[i].min_daily_budget);
            if fits {
                return scaled;
            }

            // Shrinking would break a platform minimum: drop the weakest.
            let weakest = (0..n)
                .filter(|i| included[*i])
                .min_by(|a, b| weights[*a].total_cmp(&weights[*b]));
            match weakest {
                Some(i) => included[i] = false,
                None => return vec![0.0; n],
            }
        }
    }
}

/// Clamp to the platform bounds, snap to the increment step, and keep the
/// bounds authoritative when snapping crosses them.
fn fit_to_bounds(amount: f64, rules: &PlatformRules) -> f64 {
    let (min, max) = (rules.min_daily_budget, rules.max_daily_budget);
    let clamped = amount.clamp(min, max);
    let stepped = (clamped / rules.increment_step).round() * rules.increment_step;
    stepped.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(platform: &str, current: f64, score: f64, roas: f64) -> PlatformAllocationState {
        PlatformAllocationState {
            platform: platform.to_string(),
            current_budget: current,
            score,
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

    fn assert_within_bounds(rules: &BudgetRules, allocation: &[OptimalAllocation], total: f64) {
        let sum: f64 = allocation.iter().map(|a| a.budget).sum();
        assert!(sum <= total + 1e-6, "sum {sum} exceeds total {total}");
        for a in allocation {
            let r = rules.rules_for(&a.platform);
            assert!(
                a.budget == 0.0
                    || (a.budget >= r.min_daily_budget && a.budget <= r.max_daily_budget),
                "{} budget {} outside [{}, {}]",
                a.platform,
                a.budget,
                r.min_daily_budget,
                r.max_daily_budget
            );
        }
    }

    #[test]
    fn test_weight_formula() {
        assert!((allocation_weight(100.0, std::f64::consts::E) - 1.0).abs() < 1e-9);
        assert_eq!(allocation_weight(90.0, 0.8), 0.0);
        assert!((allocation_weight(50.0, std::f64::consts::E) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_shifts_budget_toward_strong_performer() {
        let rules = BudgetRules::default();
        let optimizer = AllocationOptimizer::new(&rules);
        let platforms = vec![
            state("google_ads", 300.0, 85.0, 5.0),
            state("facebook_ads", 200.0, 40.0, 2.0),
        ];

        let allocation = optimizer.optimize(&platforms, 500.0);
        assert_within_bounds(&rules, &allocation, 500.0);
        assert_eq!(allocation[0].platform, "google_ads");
        assert!((allocation[0].budget - 450.0).abs() < 1e-9);
        assert!((allocation[1].budget - 40.0).abs() < 1e-9);
        assert_eq!(allocation[0].tier, PerformerTier::HighPerformer);
        assert_eq!(allocation[1].tier, PerformerTier::ModeratePerformer);
    }

    #[test]
    fn test_single_platform_receives_full_budget() {
        let rules = BudgetRules::default();
        let optimizer = AllocationOptimizer::new(&rules);
        let allocation = optimizer.optimize(&[state("google_ads", 100.0, 30.0, 0.5)], 400.0);
        assert_eq!(allocation.len(), 1);
        assert!((allocation[0].budget - 400.0).abs() < 1e-9);
        assert!((allocation[0].percentage - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_platform_capped_at_max() {
        let rules = BudgetRules::default();
        let optimizer = AllocationOptimizer::new(&rules);
        let allocation = optimizer.optimize(&[state("tiktok_ads", 100.0, 90.0, 5.0)], 3000.0);
        assert!((allocation[0].budget - 795.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weight_platform_gets_minimum_when_budget_allows() {
        let rules = BudgetRules::default();
        let optimizer = AllocationOptimizer::new(&rules);
        let platforms = vec![
            state("google_ads", 200.0, 80.0, 4.0),
            state("tiktok_ads", 50.0, 70.0, 0.9),
        ];

        // google_ads is capped at 2000, leaving room for tiktok's minimum.
        let allocation = optimizer.optimize(&platforms, 4000.0);
        assert!((allocation[0].budget - 2000.0).abs() < 1e-9);
        assert!((allocation[1].budget - 20.0).abs() < 1e-9);

        // No leftover: the zero-weight platform is excluded.
        let allocation = optimizer.optimize(&platforms, 400.0);
        assert!((allocation[0].budget - 400.0).abs() < 1e-9);
        assert_eq!(allocation[1].budget, 0.0);
    }

    #[test]
    fn test_minimums_force_exclusion_of_weakest() {
        let rules = BudgetRules::default();
        let optimizer = AllocationOptimizer::new(&rules);
        let platforms = vec![
            state("google_ads", 50.0, 90.0, 5.0),
            state("linkedin_ads", 40.0, 60.0, 2.0),
        ];

        // Both minimums (50 + 40) cannot fit into 80.
        let allocation = optimizer.optimize(&platforms, 80.0);
        assert_within_bounds(&rules, &allocation, 80.0);
        assert_eq!(allocation[1].budget, 0.0);
        assert!(allocation[0].budget >= 50.0);
    }

    #[test]
    fn test_zero_total_budget_allocates_nothing() {
        let rules = BudgetRules::default();
        let optimizer = AllocationOptimizer::new(&rules);
        let allocation = optimizer.optimize(&[state("google_ads", 100.0, 90.0, 5.0)], 0.0);
        assert_eq!(allocation[0].budget, 0.0);
    }

    #[test]
    fn test_bounds_hold_across_budgets() {
        let rules = BudgetRules::default();
        let optimizer = AllocationOptimizer::new(&rules);
        let platforms = vec![
            state("google_ads", 300.0, 95.0, 6.0),
            state("facebook_ads", 200.0, 70.0, 3.0),
            state("linkedin_ads", 100.0, 55.0, 1.8),
            state("tiktok_ads", 80.0, 65.0, 2.5),
        ];

        for total in [60.0, 95.0, 150.0, 400.0, 1_234.0, 3_000.0, 10_000.0] {
            let allocation = optimizer.optimize(&platforms, total);
            assert_within_bounds(&rules, &allocation, total);
        }
    }
}
