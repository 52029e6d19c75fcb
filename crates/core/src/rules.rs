//! Budget rules and monitoring thresholds.
//!
//! Every tunable constant of the control loop lives here with its default.
//! Partial JSON/TOML documents deserialize into complete rule sets, with
//! missing fields taking the defaults below.

use crate::error::{CampaignError, CampaignResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Upper bound for every configured duration: one year.
pub const MAX_WINDOW_SECS: u64 = 366 * 86_400;

// ─── Budget rules ───────────────────────────────────────────────────────

/// Per-platform allocation bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlatformRules {
    pub min_daily_budget: f64,
    pub max_daily_budget: f64,
    pub increment_step: f64,
    #[serde(default)]
    pub priority: u32,
}

impl PlatformRules {
    pub const fn new(min: f64, max: f64, step: f64, priority: u32) -> Self {
        Self {
            min_daily_budget: min,
            max_daily_budget: max,
            increment_step: step,
            priority,
        }
    }
}

impl Default for PlatformRules {
    fn default() -> Self {
        Self::new(50.0, 2000.0, 25.0, 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancingRules {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Platforms whose ROAS falls below this are paused outright.
    #[serde(default = "default_emergency_roas")]
    pub emergency_roas: f64,
    /// Budget deltas at or below this amount are ignored as noise.
    #[serde(default = "default_noise_floor")]
    pub noise_floor: f64,
    /// Deltas above this amount are ranked high priority.
    #[serde(default = "default_high_priority_delta")]
    pub high_priority_delta: f64,
    /// Expected ROAS multiplier applied to platforms receiving more budget.
    #[serde(default = "default_increase_roas_uplift")]
    pub increase_roas_uplift: f64,
}

/// Benchmarks a platform is scored against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringTargets {
    #[serde(default = "default_target_roas")]
    pub roas: f64,
    #[serde(default = "default_target_ctr")]
    pub ctr: f64,
    #[serde(default = "default_target_conversion_rate")]
    pub conversion_rate: f64,
    #[serde(default = "default_target_cpa")]
    pub cpa: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Hard ceiling on total daily spend across all platforms.
    #[serde(default = "default_max_daily_spend")]
    pub max_daily_spend: f64,
    /// Amount of the campaign daily budget that always stays unallocated.
    #[serde(default = "default_min_reserve")]
    pub min_reserve: f64,
    /// Changes of this size or larger need human approval.
    #[serde(default = "default_require_approval")]
    pub require_approval: f64,
}

/// CPA-driven bid adjustment and its confidence gates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiddingRules {
    /// Fractional bid change per adjustment.
    #[serde(default = "default_bid_adjustment_rate")]
    pub adjustment_rate: f64,
    /// Bids are lowered when CPA exceeds this multiple of the target CPA.
    #[serde(default = "default_decrease_cpa_ratio")]
    pub decrease_cpa_ratio: f64,
    /// Bids are raised when CPA is under this multiple of the target CPA
    /// and impression share is below `impression_share_target`.
    #[serde(default = "default_increase_cpa_ratio")]
    pub increase_cpa_ratio: f64,
    #[serde(default = "default_impression_share_target")]
    pub impression_share_target: f64,
    /// Confidence a recommendation of each priority must exceed before it
    /// is executed automatically.
    #[serde(default = "default_high_priority_confidence")]
    pub high_priority_confidence: f64,
    #[serde(default = "default_medium_priority_confidence")]
    pub medium_priority_confidence: f64,
    #[serde(default = "default_low_priority_confidence")]
    pub low_priority_confidence: f64,
}

/// Complete rule set used by allocation and rebalancing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetRules {
    #[serde(default = "default_platform_rules")]
    pub platforms: BTreeMap<String, PlatformRules>,
    /// Platform whose rules apply to platforms without an entry.
    #[serde(default = "default_fallback_platform")]
    pub default_platform: String,
    #[serde(default)]
    pub rebalancing: RebalancingRules,
    #[serde(default)]
    pub targets: ScoringTargets,
    #[serde(default)]
    pub safety: SafetyLimits,
    #[serde(default)]
    pub bidding: BiddingRules,
}

fn default_cooldown_secs() -> u64 {
    3600
}
fn default_emergency_roas() -> f64 {
    1.5
}
fn default_noise_floor() -> f64 {
    10.0
}
fn default_high_priority_delta() -> f64 {
    100.0
}
fn default_increase_roas_uplift() -> f64 {
    1.1
}
fn default_target_roas() -> f64 {
    4.0
}
fn default_target_ctr() -> f64 {
    0.025
}
fn default_target_conversion_rate() -> f64 {
    0.03
}
fn default_target_cpa() -> f64 {
    45.0
}
fn default_max_daily_spend() -> f64 {
    5000.0
}
fn default_min_reserve() -> f64 {
    100.0
}
fn default_require_approval() -> f64 {
    1000.0
}
fn default_bid_adjustment_rate() -> f64 {
    0.1
}
fn default_decrease_cpa_ratio() -> f64 {
    1.2
}
fn default_increase_cpa_ratio() -> f64 {
    0.8
}
fn default_impression_share_target() -> f64 {
    0.3
}
fn default_high_priority_confidence() -> f64 {
    85.0
}
fn default_medium_priority_confidence() -> f64 {
    90.0
}
fn default_low_priority_confidence() -> f64 {
    95.0
}
fn default_fallback_platform() -> String {
    "google_ads".to_string()
}

fn default_platform_rules() -> BTreeMap<String, PlatformRules> {
    BTreeMap::from([
        ("google_ads".to_string(), PlatformRules::new(50.0, 2000.0, 25.0, 1)),
        ("facebook_ads".to_string(), PlatformRules::new(30.0, 1500.0, 20.0, 2)),
        ("linkedin_ads".to_string(), PlatformRules::new(40.0, 1000.0, 20.0, 3)),
        ("tiktok_ads".to_string(), PlatformRules::new(20.0, 800.0, 15.0, 4)),
    ])
}

impl Default for RebalancingRules {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            emergency_roas: default_emergency_roas(),
            noise_floor: default_noise_floor(),
            high_priority_delta: default_high_priority_delta(),
            increase_roas_uplift: default_increase_roas_uplift(),
        }
    }
}

impl Default for ScoringTargets {
    fn default() -> Self {
        Self {
            roas: default_target_roas(),
            ctr: default_target_ctr(),
            conversion_rate: default_target_conversion_rate(),
            cpa: default_target_cpa(),
        }
    }
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_daily_spend: default_max_daily_spend(),
            min_reserve: default_min_reserve(),
            require_approval: default_require_approval(),
        }
    }
}

impl Default for BiddingRules {
    fn default() -> Self {
        Self {
            adjustment_rate: default_bid_adjustment_rate(),
            decrease_cpa_ratio: default_decrease_cpa_ratio(),
            increase_cpa_ratio: default_increase_cpa_ratio(),
            impression_share_target: default_impression_share_target(),
            high_priority_confidence: default_high_priority_confidence(),
            medium_priority_confidence: default_medium_priority_confidence(),
            low_priority_confidence: default_low_priority_confidence(),
        }
    }
}

impl Default for BudgetRules {
    fn default() -> Self {
        Self {
            platforms: default_platform_rules(),
            default_platform: default_fallback_platform(),
            rebalancing: RebalancingRules::default(),
            targets: ScoringTargets::default(),
            safety: SafetyLimits::default(),
            bidding: BiddingRules::default(),
        }
    }
}

impl BudgetRules {
    /// Rules for `platform`, falling back to the default platform's rules.
    pub fn rules_for(&self, platform: &str) -> PlatformRules {
        self.platforms
            .get(platform)
            .or_else(|| self.platforms.get(&self.default_platform))
            .copied()
            .unwrap_or_default()
    }

    pub fn cooldown(&self) -> chrono::Duration {
        window(self.rebalancing.cooldown_secs)
    }

    /// Budget the optimizer may hand out for a campaign: capped by the global
    /// spend ceiling, less the reserve.
    pub fn spendable_budget(&self, daily_budget: f64) -> f64 {
        (daily_budget.min(self.safety.max_daily_spend) - self.safety.min_reserve).max(0.0)
    }

    pub fn validate(&self) -> CampaignResult<()> {
        for (name, rules) in &self.platforms {
            if rules.min_daily_budget < 0.0 {
                return Err(config_error(format!("{name}: min_daily_budget must be non-negative")));
            }
            if rules.max_daily_budget < rules.min_daily_budget {
                return Err(config_error(format!(
                    "{name}: max_daily_budget ({}) is below min_daily_budget ({})",
                    rules.max_daily_budget, rules.min_daily_budget
                )));
            }
            if rules.increment_step <= 0.0 {
                return Err(config_error(format!("{name}: increment_step must be positive")));
            }
        }

        let r = &self.rebalancing;
        if r.emergency_roas < 0.0 || r.noise_floor < 0.0 || r.high_priority_delta < 0.0 {
            return Err(config_error("rebalancing thresholds must be non-negative"));
        }
        if r.increase_roas_uplift <= 0.0 {
            return Err(config_error("increase_roas_uplift must be positive"));
        }
        check_secs("cooldown_secs", r.cooldown_secs)?;

        let t = &self.targets;
        if t.roas <= 0.0 || t.ctr <= 0.0 || t.conversion_rate <= 0.0 || t.cpa <= 0.0 {
            return Err(config_error("scoring targets must be positive"));
        }

        let s = &self.safety;
        if s.max_daily_spend <= 0.0 {
            return Err(config_error("max_daily_spend must be positive"));
        }
        if s.min_reserve < 0.0 {
            return Err(config_error("min_reserve must be non-negative"));
        }
        if s.require_approval <= 0.0 {
            return Err(config_error("require_approval must be positive"));
        }

        let b = &self.bidding;
        if !(b.adjustment_rate > 0.0 && b.adjustment_rate < 1.0) {
            return Err(config_error("bid adjustment_rate must be within (0, 1)"));
        }
        if !(b.increase_cpa_ratio > 0.0 && b.increase_cpa_ratio < b.decrease_cpa_ratio) {
            return Err(config_error(
                "increase_cpa_ratio must be positive and below decrease_cpa_ratio",
            ));
        }
        if !(b.impression_share_target > 0.0 && b.impression_share_target <= 1.0) {
            return Err(config_error("impression_share_target must be within (0, 1]"));
        }
        let gates = [
            b.high_priority_confidence,
            b.medium_priority_confidence,
            b.low_priority_confidence,
        ];
        if gates.iter().any(|g| !(0.0..=100.0).contains(g)) {
            return Err(config_error("confidence gates must be within [0, 100]"));
        }
        Ok(())
    }
}

// ─── Monitoring thresholds ──────────────────────────────────────────────

/// One severity tier of anomaly thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdLevels {
    /// Fractional ROAS drop versus baseline.
    pub roas_drop_pct: f64,
    /// Fractional CTR drop versus baseline.
    pub ctr_drop_pct: f64,
    /// Actual spend over expected spend so far today.
    pub budget_burn_rate: f64,
    /// Absolute conversion-rate floor.
    pub conversion_rate_min: f64,
    /// Absolute cost-per-conversion ceiling.
    pub cost_per_conversion_max: f64,
}

impl ThresholdLevels {
    pub const fn critical() -> Self {
        Self {
            roas_drop_pct: 0.3,
            ctr_drop_pct: 0.4,
            budget_burn_rate: 1.5,
            conversion_rate_min: 0.01,
            cost_per_conversion_max: 100.0,
        }
    }

    pub const fn warning() -> Self {
        Self {
            roas_drop_pct: 0.15,
            ctr_drop_pct: 0.2,
            budget_burn_rate: 1.2,
            conversion_rate_min: 0.02,
            cost_per_conversion_max: 75.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisWindows {
    #[serde(default = "default_short_term_secs")]
    pub short_term_secs: u64,
    #[serde(default = "default_medium_term_secs")]
    pub medium_term_secs: u64,
    #[serde(default = "default_long_term_secs")]
    pub long_term_secs: u64,
    /// Minimum historical points needed to establish a baseline.
    #[serde(default = "default_data_points_required")]
    pub data_points_required: usize,
    #[serde(default = "default_short_term_points")]
    pub short_term_points: usize,
    #[serde(default = "default_medium_term_points")]
    pub medium_term_points: usize,
    #[serde(default = "default_short_term_trend")]
    pub short_term_trend: f64,
    #[serde(default = "default_medium_term_trend")]
    pub medium_term_trend: f64,
}

fn default_short_term_secs() -> u64 {
    3_600
}
fn default_medium_term_secs() -> u64 {
    86_400
}
fn default_long_term_secs() -> u64 {
    604_800
}
fn default_data_points_required() -> usize {
    10
}
fn default_short_term_points() -> usize {
    5
}
fn default_medium_term_points() -> usize {
    10
}
fn default_short_term_trend() -> f64 {
    0.1
}
fn default_medium_term_trend() -> f64 {
    0.05
}

impl Default for AnalysisWindows {
    fn default() -> Self {
        Self {
            short_term_secs: default_short_term_secs(),
            medium_term_secs: default_medium_term_secs(),
            long_term_secs: default_long_term_secs(),
            data_points_required: default_data_points_required(),
            short_term_points: default_short_term_points(),
            medium_term_points: default_medium_term_points(),
            short_term_trend: default_short_term_trend(),
            medium_term_trend: default_medium_term_trend(),
        }
    }
}

impl AnalysisWindows {
    pub fn short_term(&self) -> chrono::Duration {
        window(self.short_term_secs)
    }

    pub fn medium_term(&self) -> chrono::Duration {
        window(self.medium_term_secs)
    }

    pub fn long_term(&self) -> Duration {
        Duration::from_secs(self.long_term_secs.min(MAX_WINDOW_SECS))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitorThresholds {
    #[serde(default = "ThresholdLevels::critical")]
    pub critical: ThresholdLevels,
    #[serde(default = "ThresholdLevels::warning")]
    pub warning: ThresholdLevels,
    #[serde(default)]
    pub analysis: AnalysisWindows,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            critical: ThresholdLevels::critical(),
            warning: ThresholdLevels::warning(),
            analysis: AnalysisWindows::default(),
        }
    }
}

impl MonitorThresholds {
    pub fn validate(&self) -> CampaignResult<()> {
        for (tier, levels) in [("critical", &self.critical), ("warning", &self.warning)] {
            if !(levels.roas_drop_pct > 0.0 && levels.roas_drop_pct <= 1.0)
                || !(levels.ctr_drop_pct > 0.0 && levels.ctr_drop_pct <= 1.0)
            {
                return Err(config_error(format!("{tier}: drop thresholds must be within (0, 1]")));
            }
            if levels.budget_burn_rate <= 0.0
                || levels.conversion_rate_min < 0.0
                || levels.cost_per_conversion_max <= 0.0
            {
                return Err(config_error(format!("{tier}: thresholds must be positive")));
            }
        }

        let (c, w) = (&self.critical, &self.warning);
        if c.roas_drop_pct <= w.roas_drop_pct
            || c.ctr_drop_pct <= w.ctr_drop_pct
            || c.budget_burn_rate <= w.budget_burn_rate
            || c.conversion_rate_min >= w.conversion_rate_min
            || c.cost_per_conversion_max <= w.cost_per_conversion_max
        {
            return Err(config_error(
                "critical thresholds must be stricter than warning thresholds",
            ));
        }

        let a = &self.analysis;
        if a.short_term_secs == 0 || a.medium_term_secs == 0 || a.long_term_secs == 0 {
            return Err(config_error("analysis windows must be non-zero"));
        }
        check_secs("short_term_secs", a.short_term_secs)?;
        check_secs("medium_term_secs", a.medium_term_secs)?;
        check_secs("long_term_secs", a.long_term_secs)?;
        if a.short_term_secs > a.medium_term_secs {
            return Err(config_error("short-term window exceeds medium-term window"));
        }
        if a.data_points_required == 0 || a.short_term_points < 2 || a.medium_term_points < 2 {
            return Err(config_error("trend windows need at least two points"));
        }
        Ok(())
    }
}

// ─── Monitor config ─────────────────────────────────────────────────────

/// Per-campaign monitor settings supplied to `start_monitoring`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub thresholds: MonitorThresholds,
    /// Size of the per-campaign alert ring buffer.
    #[serde(default = "default_alert_history_limit")]
    pub alert_history_limit: usize,
    /// Alerts younger than this count as active in snapshots.
    #[serde(default = "default_active_alert_window_secs")]
    pub active_alert_window_secs: u64,
    #[serde(default = "default_external_timeout_ms")]
    pub external_timeout_ms: u64,
    #[serde(default = "default_baseline_refresh_secs")]
    pub baseline_refresh_secs: u64,
    /// Fraction bids are cut by when `reduce-bids` fires.
    #[serde(default = "default_bid_reduction")]
    pub bid_reduction: f64,
}

fn default_interval_ms() -> u64 {
    300_000
}
fn default_alert_history_limit() -> usize {
    100
}
fn default_active_alert_window_secs() -> u64 {
    3_600
}
fn default_external_timeout_ms() -> u64 {
    10_000
}
fn default_baseline_refresh_secs() -> u64 {
    86_400
}
fn default_bid_reduction() -> f64 {
    0.2
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            thresholds: MonitorThresholds::default(),
            alert_history_limit: default_alert_history_limit(),
            active_alert_window_secs: default_active_alert_window_secs(),
            external_timeout_ms: default_external_timeout_ms(),
            baseline_refresh_secs: default_baseline_refresh_secs(),
            bid_reduction: default_bid_reduction(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.min(MAX_WINDOW_SECS * 1_000))
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_millis(self.external_timeout_ms.min(MAX_WINDOW_SECS * 1_000))
    }

    /// How long an alert counts as active in snapshots.
    pub fn active_alert_window(&self) -> chrono::Duration {
        window(self.active_alert_window_secs)
    }

    /// Age after which the baseline is recomputed.
    pub fn baseline_max_age(&self) -> chrono::Duration {
        window(self.baseline_refresh_secs)
    }

    pub fn validate(&self) -> CampaignResult<()> {
        if self.interval_ms == 0 {
            return Err(config_error("interval_ms must be positive"));
        }
        if self.alert_history_limit == 0 {
            return Err(config_error("alert_history_limit must be positive"));
        }
        if self.external_timeout_ms == 0 {
            return Err(config_error("external_timeout_ms must be positive"));
        }
        check_secs("interval_ms", self.interval_ms / 1_000)?;
        check_secs("external_timeout_ms", self.external_timeout_ms / 1_000)?;
        check_secs("active_alert_window_secs", self.active_alert_window_secs)?;
        check_secs("baseline_refresh_secs", self.baseline_refresh_secs)?;
        if !(self.bid_reduction > 0.0 && self.bid_reduction < 1.0) {
            return Err(config_error("bid_reduction must be within (0, 1)"));
        }
        self.thresholds.validate()
    }
}

fn config_error(msg: impl Into<String>) -> CampaignError {
    CampaignError::Config(msg.into())
}

fn check_secs(name: &str, secs: u64) -> CampaignResult<()> {
    if secs > MAX_WINDOW_SECS {
        return Err(config_error(format!(
            "{name} exceeds the maximum of {MAX_WINDOW_SECS} seconds"
        )));
    }
    Ok(())
}

/// Clamped so an unvalidated value can never overflow chrono's range.
fn window(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}
