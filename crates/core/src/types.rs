use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Platform id used for campaign-level snapshots summed across channels.
pub const AGGREGATE_PLATFORM: &str = "all";

/// `numerator / denominator`, or 0.0 when the denominator is not positive.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

// ─── Performance ────────────────────────────────────────────────────────

/// Raw delivery counters reported by an ad platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceCounters {
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub cost: f64,
    pub revenue: f64,
}

impl PerformanceCounters {
    pub fn roas(&self) -> f64 {
        safe_ratio(self.revenue, self.cost)
    }

    pub fn ctr(&self) -> f64 {
        safe_ratio(self.clicks as f64, self.impressions as f64)
    }

    pub fn conversion_rate(&self) -> f64 {
        safe_ratio(self.conversions as f64, self.clicks as f64)
    }

    pub fn cpa(&self) -> f64 {
        safe_ratio(self.cost, self.conversions as f64)
    }

    fn add(&mut self, other: &PerformanceCounters) {
        self.impressions += other.impressions;
        self.clicks += other.clicks;
        self.conversions += other.conversions;
        self.cost += other.cost;
        self.revenue += other.revenue;
    }
}

/// Point-in-time metrics for one platform (or the whole campaign when
/// `platform` is [`AGGREGATE_PLATFORM`]). Produced by the metrics source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub platform: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub counters: PerformanceCounters,
}

impl MetricsSnapshot {
    pub fn new(
        platform: impl Into<String>,
        timestamp: DateTime<Utc>,
        counters: PerformanceCounters,
    ) -> Self {
        Self {
            platform: platform.into(),
            timestamp,
            counters,
        }
    }

    /// Sum per-platform snapshots into one campaign-level snapshot stamped
    /// with the latest timestamp of the inputs.
    pub fn aggregate(snapshots: &[MetricsSnapshot]) -> Option<MetricsSnapshot> {
        let timestamp = snapshots.iter().map(|s| s.timestamp).max()?;
        let mut counters = PerformanceCounters::default();
        for snapshot in snapshots {
            counters.add(&snapshot.counters);
        }
        Some(Self::new(AGGREGATE_PLATFORM, timestamp, counters))
    }

    pub fn spend(&self) -> f64 {
        self.counters.cost
    }

    pub fn roas(&self) -> f64 {
        self.counters.roas()
    }

    pub fn ctr(&self) -> f64 {
        self.counters.ctr()
    }

    pub fn conversion_rate(&self) -> f64 {
        self.counters.conversion_rate()
    }

    pub fn cpa(&self) -> f64 {
        self.counters.cpa()
    }
}

// ─── Campaign ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Active,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    #[default]
    Active,
    Paused,
}

/// One ad platform a campaign spends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformChannel {
    pub platform: String,
    pub daily_budget: f64,
    #[serde(default)]
    pub status: ChannelStatus,
    #[serde(default)]
    pub performance: PerformanceCounters,
}

impl PlatformChannel {
    pub fn is_active(&self) -> bool {
        self.status == ChannelStatus::Active
    }
}

/// Campaign record as held by the campaign store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub daily_budget: f64,
    #[serde(default)]
    pub status: CampaignStatus,
    #[serde(default)]
    pub platforms: Vec<PlatformChannel>,
    #[serde(default)]
    pub budget_history: Vec<BudgetHistoryEntry>,
}

impl Campaign {
    pub fn platform(&self, platform: &str) -> Option<&PlatformChannel> {
        self.platforms.iter().find(|p| p.platform == platform)
    }

    pub fn active_platforms(&self) -> impl Iterator<Item = &PlatformChannel> {
        self.platforms.iter().filter(|p| p.is_active())
    }

    /// Sum of the current per-platform budgets of active channels.
    pub fn allocated_budget(&self) -> f64 {
        self.active_platforms().map(|p| p.daily_budget).sum()
    }
}

// ─── Budget history ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAction {
    Increase,
    Decrease,
    Pause,
}

impl std::fmt::Display for BudgetAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Increase => "increase",
            Self::Decrease => "decrease",
            Self::Pause => "pause",
        };
        f.write_str(s)
    }
}

/// A single budget change applied to a campaign platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetChange {
    pub platform: String,
    pub action: BudgetAction,
    pub previous_budget: f64,
    pub new_budget: f64,
    pub reason: String,
}

/// Append-only audit entry written to a campaign's budget history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub platform: String,
    pub previous_budget: f64,
    pub new_budget: f64,
    pub reason: String,
    pub action: BudgetAction,
}

impl BudgetHistoryEntry {
    pub fn from_change(change: &BudgetChange, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            platform: change.platform.clone(),
            previous_budget: change.previous_budget,
            new_budget: change.new_budget,
            reason: change.reason.clone(),
            action: change.action,
        }
    }
}

// ─── Alerts ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    Roas,
    Ctr,
    Budget,
    ConversionRate,
    Cpa,
}

/// Mitigation the monitor or bid optimizer asks the action executor to
/// perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutomatedAction {
    PauseLowPerformers,
    RefreshCreatives,
    ReduceBids,
    IncreaseBids,
    OptimizeLandingPages,
}

impl AutomatedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PauseLowPerformers => "pause-low-performers",
            Self::RefreshCreatives => "refresh-creatives",
            Self::ReduceBids => "reduce-bids",
            Self::IncreaseBids => "increase-bids",
            Self::OptimizeLandingPages => "optimize-landing-pages",
        }
    }
}

impl std::fmt::Display for AutomatedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A performance alert raised by anomaly detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub campaign_id: String,
    pub severity: AlertSeverity,
    pub metric: AlertMetric,
    pub message: String,
    /// Measured value that triggered the alert.
    pub value: f64,
    /// Baseline or threshold the value was compared against.
    pub reference: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automated_action: Option<AutomatedAction>,
    pub triggered_at: DateTime<Utc>,
}

/// Request handed to the action executor for one automated mitigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub campaign_id: String,
    pub action: AutomatedAction,
    /// Alert that triggered the action; absent for bid optimization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<Uuid>,
    /// Target platform; absent means campaign-wide.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Signed fractional bid change: negative lowers bids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_adjustment: Option<f64>,
}
