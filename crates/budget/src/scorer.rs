//! Performance scoring — maps raw delivery metrics onto a 0–100 score
//! against the campaign's target benchmarks.

use campaign_core::rules::ScoringTargets;
use campaign_core::types::PerformanceCounters;

/// Neutral starting score before any metric contributes.
const BASE_SCORE: f64 = 50.0;
const ROAS_WEIGHT: f64 = 40.0;
const CTR_WEIGHT: f64 = 20.0;
const CONVERSION_WEIGHT: f64 = 20.0;
const CPA_WEIGHT: f64 = 20.0;
/// Below-target ROAS earns only this fraction of its proportional points.
const UNDERPERFORMANCE_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct PerformanceScorer {
    targets: ScoringTargets,
}

impl Default for PerformanceScorer {
    fn default() -> Self {
        Self::new(ScoringTargets::default())
    }
}

impl PerformanceScorer {
    pub fn new(targets: ScoringTargets) -> Self {
        Self { targets }
    }

    pub fn score(&self, counters: &PerformanceCounters) -> f64 {
        self.score_ratios(
            counters.roas(),
            counters.ctr(),
            counters.conversion_rate(),
            counters.cpa(),
        )
    }

    pub fn score_ratios(&self, roas: f64, ctr: f64, conversion_rate: f64, cpa: f64) -> f64 {
        let t = &self.targets;
        let mut score = BASE_SCORE;

        let roas_ratio = roas / t.roas;
        score += if roas >= t.roas {
            ROAS_WEIGHT * roas_ratio.min(1.0)
        } else {
            ROAS_WEIGHT * roas_ratio * UNDERPERFORMANCE_FACTOR
        };

        score += CTR_WEIGHT * (ctr / t.ctr).min(1.0);
        score += CONVERSION_WEIGHT * (conversion_rate / t.conversion_rate).min(1.0);

        let cpa_ceiling = t.cpa * 2.0;
        if cpa > 0.0 && cpa < cpa_ceiling {
            score += CPA_WEIGHT * (1.0 - cpa / cpa_ceiling).max(0.0);
        }

        score.clamp(0.0, 100.0)
    }
}
