//! Rolling performance baseline, rebuilt from the long-term history window.

use campaign_core::types::MetricsSnapshot;
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub avg_roas: f64,
    pub avg_ctr: f64,
    pub avg_cpa: f64,
    pub avg_conversion_rate: f64,
    /// Campaign daily budget at the time the baseline was taken.
    pub daily_budget: f64,
    pub roas_variance: f64,
    /// Standard deviation of ROAS, the campaign's normal spread.
    pub roas_std_dev: f64,
    pub sample_count: usize,
    pub computed_at: DateTime<Utc>,
}

impl Baseline {
    pub fn from_history(
        history: &[MetricsSnapshot],
        daily_budget: f64,
        required: usize,
    ) -> CampaignResult<Self> {
        if history.len() < required || history.is_empty() {
            return Err(CampaignError::InsufficientData {
                required,
                available: history.len(),
            });
        }

        let roas: Vec<f64> = history.iter().map(|s| s.roas()).collect();
        let avg_roas = mean(&roas);
        let roas_variance = if roas.len() < 2 {
            0.0
        } else {
            mean(&roas.iter().map(|r| (r - avg_roas).powi(2)).collect::<Vec<_>>())
        };

        Ok(Self {
            avg_roas,
            avg_ctr: mean(&history.iter().map(|s| s.ctr()).collect::<Vec<_>>()),
            avg_cpa: mean(&history.iter().map(|s| s.cpa()).collect::<Vec<_>>()),
            avg_conversion_rate: mean(
                &history.iter().map(|s| s.conversion_rate()).collect::<Vec<_>>(),
            ),
            daily_budget,
            roas_variance,
            roas_std_dev: roas_variance.sqrt(),
            sample_count: history.len(),
            computed_at: Utc::now(),
        })
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.computed_at >= max_age
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
