//! Expected impact of a set of budget changes on blended ROAS and revenue.

use crate::optimizer::PlatformAllocationState;
use campaign_core::types::safe_ratio;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedImpact {
    pub current_spend: f64,
    pub current_revenue: f64,
    pub current_roas: f64,
    pub expected_spend: f64,
    pub expected_revenue: f64,
    pub expected_roas: f64,
    /// Relative ROAS change in percent.
    pub roas_improvement_pct: f64,
    /// Absolute revenue change in dollars.
    pub revenue_delta: f64,
}

/// A planned budget for one platform and the ROAS expected at that budget.
#[derive(Debug, Clone, Copy)]
pub struct PlannedBudget<'a> {
    pub platform: &'a str,
    pub budget: f64,
    pub expected_roas: f64,
}

impl ExpectedImpact {
    /// Blend every platform's spend and revenue, scaling spend of changed
    /// platforms by their budget ratio. Unchanged platforms carry their
    /// current figures into both sides.
    pub fn compute(platforms: &[PlatformAllocationState], plan: &[PlannedBudget<'_>]) -> Self {
        let mut impact = Self::default();

        for platform in platforms {
            impact.current_spend += platform.spend;
            impact.current_revenue += platform.revenue;

            match plan.iter().find(|p| p.platform == platform.platform) {
                Some(planned) => {
                    let expected_spend = if platform.current_budget > 0.0 {
                        platform.spend * (planned.budget / platform.current_budget)
                    } else {
                        planned.budget
                    };
                    impact.expected_spend += expected_spend;
                    impact.expected_revenue += expected_spend * planned.expected_roas;
                }
                None => {
                    impact.expected_spend += platform.spend;
                    impact.expected_revenue += platform.revenue;
                }
            }
        }

        impact.current_roas = safe_ratio(impact.current_revenue, impact.current_spend);
        impact.expected_roas = safe_ratio(impact.expected_revenue, impact.expected_spend);
        impact.roas_improvement_pct =
            safe_ratio(impact.expected_roas - impact.current_roas, impact.current_roas) * 100.0;
        impact.revenue_delta = impact.expected_revenue - impact.current_revenue;
        impact
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(platform: &str, budget: f64, spend: f64, roas: f64) -> PlatformAllocationState {
        PlatformAllocationState {
            platform: platform.to_string(),
            current_budget: budget,
            score: 50.0,
            roas,
            ctr: 0.0,
            conversion_rate: 0.0,
            cpa: 0.0,
            spend,
            revenue: spend * roas,
            impressions: 0,
            conversions: 0,
        }
    }

    #[test]
    fn test_shift_toward_higher_roas_improves_blend() {
        let platforms = vec![
            state("google_ads", 300.0, 300.0, 5.0),
            state("facebook_ads", 200.0, 200.0, 2.0),
        ];
        let plan = vec![
            PlannedBudget { platform: "google_ads", budget: 400.0, expected_roas: 5.0 },
            PlannedBudget { platform: "facebook_ads", budget: 100.0, expected_roas: 2.0 },
        ];

        let impact = ExpectedImpact::compute(&platforms, &plan);
        assert!((impact.current_roas - 3.8).abs() < 1e-9);
        assert!((impact.expected_roas - 4.4).abs() < 1e-9);
        assert!((impact.revenue_delta - 300.0).abs() < 1e-9);
        assert!(impact.roas_improvement_pct > 15.0);
    }

    #[test]
    fn test_unplanned_platforms_carry_current_figures() {
        let platforms = vec![state("google_ads", 300.0, 300.0, 5.0)];
        let impact = ExpectedImpact::compute(&platforms, &[]);
        assert_eq!(impact.current_roas, impact.expected_roas);
        assert_eq!(impact.revenue_delta, 0.0);
        assert_eq!(impact.roas_improvement_pct, 0.0);
    }

    #[test]
    fn test_no_spend_yields_zero_ratios() {
        let impact = ExpectedImpact::compute(&[], &[]);
        assert_eq!(impact, ExpectedImpact::default());
    }
}
