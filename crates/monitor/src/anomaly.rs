//! Anomaly detection — compares a live snapshot against the baseline and
//! classifies breaches into warning and critical alerts.

use crate::baseline::Baseline;
use campaign_core::rules::{MonitorThresholds, ThresholdLevels};
use campaign_core::types::{
    safe_ratio, Alert, AlertMetric, AlertSeverity, AutomatedAction, MetricsSnapshot,
};
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Relative deviation of each ratio from its baseline average.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Deviations {
    pub roas: f64,
    pub ctr: f64,
    pub conversion_rate: f64,
    pub cpa: f64,
}

impl Deviations {
    pub fn between(snapshot: &MetricsSnapshot, baseline: &Baseline) -> Self {
        Self {
            roas: deviation(snapshot.roas(), baseline.avg_roas),
            ctr: deviation(snapshot.ctr(), baseline.avg_ctr),
            conversion_rate: deviation(snapshot.conversion_rate(), baseline.avg_conversion_rate),
            cpa: deviation(snapshot.cpa(), baseline.avg_cpa),
        }
    }

    /// 100 minus penalties for every ratio below its baseline, floored at 0.
    pub fn health_score(&self) -> f64 {
        let mut score = 100.0;
        if self.roas < 0.0 {
            score -= self.roas.abs() * 100.0;
        }
        if self.ctr < 0.0 {
            score -= self.ctr.abs() * 50.0;
        }
        if self.conversion_rate < 0.0 {
            score -= self.conversion_rate.abs() * 50.0;
        }
        f64::max(score, 0.0)
    }
}

fn deviation(current: f64, baseline: f64) -> f64 {
    if baseline == 0.0 {
        0.0
    } else {
        (current - baseline) / baseline
    }
}

/// Fraction of the UTC day elapsed at `at`.
pub fn fraction_of_day(at: DateTime<Utc>) -> f64 {
    at.num_seconds_from_midnight() as f64 / SECONDS_PER_DAY
}

/// Spend so far relative to the spend expected by this time of day, or
/// `None` when nothing is expected yet.
pub fn burn_rate(snapshot: &MetricsSnapshot, baseline: &Baseline) -> Option<f64> {
    let expected = baseline.daily_budget * fraction_of_day(snapshot.timestamp);
    if expected <= 0.0 {
        return None;
    }
    Some(safe_ratio(snapshot.spend(), expected))
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    critical: ThresholdLevels,
    warning: ThresholdLevels,
}

impl AnomalyDetector {
    pub fn new(thresholds: &MonitorThresholds) -> Self {
        Self {
            critical: thresholds.critical,
            warning: thresholds.warning,
        }
    }

    pub fn detect(
        &self,
        campaign_id: &str,
        snapshot: &MetricsSnapshot,
        baseline: &Baseline,
    ) -> Vec<Alert> {
        let deviations = Deviations::between(snapshot, baseline);
        let (crit, warn) = (&self.critical, &self.warning);
        let now = Utc::now();
        let mut alerts = Vec::new();
        let mut raise = |severity, metric, message: String, value, reference, action| {
            alerts.push(Alert {
                id: Uuid::new_v4(),
                campaign_id: campaign_id.to_string(),
                severity,
                metric,
                message,
                value,
                reference,
                automated_action: action,
                triggered_at: now,
            });
        };

        // ROAS
        let drop_pct = deviations.roas.abs() * 100.0;
        if deviations.roas < -crit.roas_drop_pct {
            raise(
                AlertSeverity::Critical,
                AlertMetric::Roas,
                format!("ROAS dropped {drop_pct:.1}% below baseline"),
                snapshot.roas(),
                baseline.avg_roas,
                Some(AutomatedAction::PauseLowPerformers),
            );
        } else if deviations.roas < -warn.roas_drop_pct {
            raise(
                AlertSeverity::Warning,
                AlertMetric::Roas,
                format!("ROAS declining - down {drop_pct:.1}%"),
                snapshot.roas(),
                baseline.avg_roas,
                None,
            );
        }

        // CTR
        let drop_pct = deviations.ctr.abs() * 100.0;
        if deviations.ctr < -crit.ctr_drop_pct {
            raise(
                AlertSeverity::Critical,
                AlertMetric::Ctr,
                format!("CTR dropped {drop_pct:.1}% below baseline"),
                snapshot.ctr(),
                baseline.avg_ctr,
                Some(AutomatedAction::RefreshCreatives),
            );
        } else if deviations.ctr < -warn.ctr_drop_pct {
            raise(
                AlertSeverity::Warning,
                AlertMetric::Ctr,
                format!("CTR declining - down {drop_pct:.1}%"),
                snapshot.ctr(),
                baseline.avg_ctr,
                None,
            );
        }

        // Budget pacing
        if let Some(rate) = burn_rate(snapshot, baseline) {
            let expected = baseline.daily_budget * fraction_of_day(snapshot.timestamp);
            if rate > crit.budget_burn_rate {
                raise(
                    AlertSeverity::Critical,
                    AlertMetric::Budget,
                    format!("Budget burning at {:.0}% of expected rate", rate * 100.0),
                    snapshot.spend(),
                    expected,
                    Some(AutomatedAction::ReduceBids),
                );
            } else if rate > warn.budget_burn_rate {
                raise(
                    AlertSeverity::Warning,
                    AlertMetric::Budget,
                    format!("Budget pacing ahead at {:.0}% of expected rate", rate * 100.0),
                    snapshot.spend(),
                    expected,
                    None,
                );
            }
        }

        // Conversion rate floor; no clicks means no signal.
        if snapshot.counters.clicks > 0 {
            let rate = snapshot.conversion_rate();
            if rate < crit.conversion_rate_min {
                raise(
                    AlertSeverity::Critical,
                    AlertMetric::ConversionRate,
                    format!("Conversion rate critically low at {:.2}%", rate * 100.0),
                    rate,
                    crit.conversion_rate_min,
                    Some(AutomatedAction::OptimizeLandingPages),
                );
            } else if rate < warn.conversion_rate_min {
                raise(
                    AlertSeverity::Warning,
                    AlertMetric::ConversionRate,
                    format!("Conversion rate low at {:.2}%", rate * 100.0),
                    rate,
                    warn.conversion_rate_min,
                    None,
                );
            }
        }

        // Cost per conversion ceiling
        if snapshot.counters.conversions > 0 {
            let cpa = snapshot.cpa();
            if cpa > crit.cost_per_conversion_max {
                raise(
                    AlertSeverity::Critical,
                    AlertMetric::Cpa,
                    format!("Cost per conversion at ${cpa:.2}"),
                    cpa,
                    crit.cost_per_conversion_max,
                    Some(AutomatedAction::ReduceBids),
                );
            } else if cpa > warn.cost_per_conversion_max {
                raise(
                    AlertSeverity::Warning,
                    AlertMetric::Cpa,
                    format!("Cost per conversion rising at ${cpa:.2}"),
                    cpa,
                    warn.cost_per_conversion_max,
                    None,
                );
            }
        }

        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::PerformanceCounters;
    use chrono::TimeZone;

    fn baseline(daily_budget: f64) -> Baseline {
        Baseline {
            avg_roas: 4.0,
            avg_ctr: 0.025,
            avg_cpa: 40.0,
            avg_conversion_rate: 0.03,
            daily_budget,
            roas_variance: 0.25,
            roas_std_dev: 0.5,
            sample_count: 20,
            computed_at: Utc::now(),
        }
    }

    /// 10k impressions with `cost` spent at `roas`.
    fn snapshot_at(
        at: DateTime<Utc>,
        roas: f64,
        clicks: u64,
        conversions: u64,
        cost: f64,
    ) -> MetricsSnapshot {
        MetricsSnapshot::new(
            "all",
            at,
            PerformanceCounters {
                impressions: 10_000,
                clicks,
                conversions,
                cost,
                revenue: cost * roas,
            },
        )
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_snapshot_at_baseline_raises_nothing() {
        let detector = AnomalyDetector::new(&MonitorThresholds::default());
        // CTR 2.5%, CR 3.2%, ROAS 4, spend exactly on pace.
        let snapshot = snapshot_at(noon(), 4.0, 250, 8, 250.0);
        let alerts = detector.detect("c-1", &snapshot, &baseline(500.0));
        assert!(alerts.is_empty(), "unexpected alerts: {alerts:?}");

        let deviations = Deviations::between(&snapshot, &baseline(500.0));
        assert!(deviations.roas.abs() < 1e-9);
        assert!((deviations.health_score() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_roas_drop_raises_single_critical_alert() {
        let detector = AnomalyDetector::new(&MonitorThresholds::default());
        let snapshot = snapshot_at(noon(), 2.6, 250, 8, 250.0);
        let alerts = detector.detect("c-1", &snapshot, &baseline(500.0));

        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(alert.metric, AlertMetric::Roas);
        assert_eq!(alert.automated_action, Some(AutomatedAction::PauseLowPerformers));
        assert!(alert.message.contains("35.0%"));
        assert_eq!(alert.reference, 4.0);
    }

    #[test]
    fn test_moderate_roas_drop_is_warning_only() {
        let detector = AnomalyDetector::new(&MonitorThresholds::default());
        let snapshot = snapshot_at(noon(), 3.2, 250, 8, 250.0);
        let alerts = detector.detect("c-1", &snapshot, &baseline(500.0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert!(alerts[0].automated_action.is_none());
    }

    #[test]
    fn test_ctr_collapse_requests_creative_refresh() {
        let detector = AnomalyDetector::new(&MonitorThresholds::default());
        // CTR 1.0% vs 2.5% baseline; 3 of 100 clicks convert.
        let snapshot = snapshot_at(noon(), 4.0, 100, 3, 120.0);
        let alerts = detector.detect("c-1", &snapshot, &baseline(0.0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, AlertMetric::Ctr);
        assert_eq!(alerts[0].automated_action, Some(AutomatedAction::RefreshCreatives));
    }

    #[test]
    fn test_burn_rate_uses_snapshot_time_of_day() {
        let detector = AnomalyDetector::new(&MonitorThresholds::default());
        // At noon 250 is on pace for a 500 budget; 400 is 160%.
        let snapshot = snapshot_at(noon(), 4.0, 250, 8, 400.0);
        let rate = burn_rate(&snapshot, &baseline(500.0)).unwrap();
        assert!((rate - 1.6).abs() < 1e-9);

        let alerts = detector.detect("c-1", &snapshot, &baseline(500.0));
        let budget: Vec<&Alert> = alerts
            .iter()
            .filter(|a| a.metric == AlertMetric::Budget)
            .collect();
        assert_eq!(budget.len(), 1);
        assert_eq!(budget[0].automated_action, Some(AutomatedAction::ReduceBids));
        assert!((budget[0].reference - 250.0).abs() < 1e-9);

        // Midnight: nothing expected yet, so no pacing check.
        let midnight = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        assert!(burn_rate(&snapshot_at(midnight, 4.0, 250, 8, 400.0), &baseline(500.0)).is_none());
    }

    #[test]
    fn test_conversion_rate_and_cpa_thresholds() {
        let detector = AnomalyDetector::new(&MonitorThresholds::default());

        // 2 of 250 clicks convert (0.8%) at CPA 125.
        let snapshot = snapshot_at(noon(), 4.0, 250, 2, 250.0);
        let alerts = detector.detect("c-1", &snapshot, &baseline(500.0));
        let actions: Vec<_> = alerts.iter().filter_map(|a| a.automated_action).collect();
        assert!(actions.contains(&AutomatedAction::OptimizeLandingPages));
        assert!(actions.contains(&AutomatedAction::ReduceBids));
        assert!(alerts.iter().all(|a| a.severity == AlertSeverity::Critical));

        // No clicks: conversion rate is not evaluated.
        let silent = snapshot_at(noon(), 4.0, 0, 0, 250.0);
        let alerts = detector.detect("c-1", &silent, &baseline(500.0));
        assert!(alerts.iter().all(|a| a.metric != AlertMetric::ConversionRate));
    }

    #[test]
    fn test_health_score_penalizes_declines_only() {
        let deviations = Deviations {
            roas: -0.2,
            ctr: -0.1,
            conversion_rate: 0.3,
            cpa: 0.5,
        };
        assert!((deviations.health_score() - 75.0).abs() < 1e-9);

        let collapse = Deviations {
            roas: -0.9,
            ctr: -0.9,
            conversion_rate: -0.9,
            cpa: 0.0,
        };
        assert_eq!(collapse.health_score(), 0.0);
    }

    #[test]
    fn test_zero_baseline_yields_zero_deviation() {
        let mut empty = baseline(0.0);
        empty.avg_ctr = 0.0;
        let snapshot = snapshot_at(noon(), 4.0, 250, 8, 250.0);
        assert_eq!(Deviations::between(&snapshot, &empty).ctr, 0.0);
    }
}
