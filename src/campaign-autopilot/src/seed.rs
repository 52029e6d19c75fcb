//! JSON seed file loaded into the in-memory collaborators at startup.
//!
//! Metric timestamps are relative (`hours_ago`) so a seed file stays inside
//! the baseline window no matter when it is loaded.

use anyhow::Context;
use campaign_core::memory::{InMemoryCampaignStore, InMemoryMetricsSource};
use campaign_core::types::{Campaign, MetricsSnapshot, PerformanceCounters, AGGREGATE_PLATFORM};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub campaigns: Vec<SeedCampaign>,
}

#[derive(Debug, Deserialize)]
pub struct SeedCampaign {
    #[serde(flatten)]
    pub campaign: Campaign,
    /// Campaign-level history for the baseline.
    #[serde(default)]
    pub history: Vec<SeedPoint>,
    /// Live metrics; summed from the platform counters when absent.
    #[serde(default)]
    pub current: Option<PerformanceCounters>,
}

#[derive(Debug, Deserialize)]
pub struct SeedPoint {
    #[serde(default)]
    pub hours_ago: u32,
    #[serde(flatten)]
    pub counters: PerformanceCounters,
}

impl SeedFile {
    pub fn read(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
    }

    /// Load every campaign and its metrics, returning the seeded ids.
    pub fn load_into(
        self,
        store: &InMemoryCampaignStore,
        metrics: &InMemoryMetricsSource,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.campaigns.len());
        for seed in self.campaigns {
            let id = seed.campaign.id.clone();

            let history = seed
                .history
                .iter()
                .map(|p| {
                    let at = now - chrono::Duration::hours(i64::from(p.hours_ago));
                    MetricsSnapshot::new(AGGREGATE_PLATFORM, at, p.counters)
                })
                .collect();
            metrics.set_history(&id, history);

            let current = match seed.current {
                Some(counters) => Some(MetricsSnapshot::new(AGGREGATE_PLATFORM, now, counters)),
                None => {
                    let per_platform: Vec<MetricsSnapshot> = seed
                        .campaign
                        .active_platforms()
                        .map(|c| MetricsSnapshot::new(c.platform.clone(), now, c.performance))
                        .collect();
                    MetricsSnapshot::aggregate(&per_platform)
                }
            };
            if let Some(snapshot) = current {
                metrics.set_current(&id, snapshot);
            }

            store.insert(seed.campaign);
            ids.push(id);
        }
        ids
    }
}
