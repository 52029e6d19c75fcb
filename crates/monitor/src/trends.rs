//! Short and medium-term trend history of a monitored campaign.

use campaign_core::rules::AnalysisWindows;
use campaign_core::types::{safe_ratio, MetricsSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Upper bound on points kept per window regardless of tick interval.
const MAX_POINTS_PER_WINDOW: usize = 2_880;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    #[default]
    Stable,
    Declining,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub roas: f64,
    pub ctr: f64,
    pub conversion_rate: f64,
    pub cpa: f64,
    pub spend: f64,
}

impl From<&MetricsSnapshot> for TrendPoint {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        Self {
            timestamp: snapshot.timestamp,
            roas: snapshot.roas(),
            ctr: snapshot.ctr(),
            conversion_rate: snapshot.conversion_rate(),
            cpa: snapshot.cpa(),
            spend: snapshot.spend(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub short_term: TrendDirection,
    pub medium_term: TrendDirection,
}

#[derive(Debug, Clone, Default)]
pub struct TrendHistory {
    short_term: VecDeque<TrendPoint>,
    medium_term: VecDeque<TrendPoint>,
}

impl TrendHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point and drop everything older than each window as of `now`.
    pub fn record(&mut self, point: TrendPoint, now: DateTime<Utc>, windows: &AnalysisWindows) {
        push_windowed(&mut self.short_term, point, now, windows.short_term());
        push_windowed(&mut self.medium_term, point, now, windows.medium_term());
    }

    pub fn short_term(&self) -> &VecDeque<TrendPoint> {
        &self.short_term
    }

    pub fn medium_term(&self) -> &VecDeque<TrendPoint> {
        &self.medium_term
    }

    pub fn summary(&self, windows: &AnalysisWindows) -> TrendSummary {
        TrendSummary {
            short_term: classify(
                &self.short_term,
                windows.short_term_points,
                windows.short_term_trend,
            ),
            medium_term: classify(
                &self.medium_term,
                windows.medium_term_points,
                windows.medium_term_trend,
            ),
        }
    }
}

fn push_windowed(
    points: &mut VecDeque<TrendPoint>,
    point: TrendPoint,
    now: DateTime<Utc>,
    window: chrono::Duration,
) {
    points.push_back(point);
    let cutoff = now - window;
    while points.front().is_some_and(|p| p.timestamp <= cutoff) {
        points.pop_front();
    }
    while points.len() > MAX_POINTS_PER_WINDOW {
        points.pop_front();
    }
}

/// Relative ROAS change between the first and last of the latest
/// `required` points.
fn classify(points: &VecDeque<TrendPoint>, required: usize, threshold: f64) -> TrendDirection {
    if points.len() < required || required < 2 {
        return TrendDirection::Stable;
    }
    let recent = points.range(points.len() - required..);
    let mut roas = recent.map(|p| p.roas);
    let (Some(first), Some(last)) = (roas.next(), roas.last()) else {
        return TrendDirection::Stable;
    };

    let change = safe_ratio(last - first, first);
    if change > threshold {
        TrendDirection::Improving
    } else if change < -threshold {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    }
}
