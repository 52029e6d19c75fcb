//! Registry of running campaign monitors.

use crate::monitor::{CampaignMonitor, MonitorState};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// A running monitor task and the means to stop it.
pub struct MonitorHandle {
    monitor: Arc<CampaignMonitor>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn spawn(monitor: Arc<CampaignMonitor>) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let task = monitor.clone().spawn(rx);
        Self {
            monitor,
            shutdown,
            task,
        }
    }

    pub fn monitor(&self) -> &Arc<CampaignMonitor> {
        &self.monitor
    }

    /// Signal shutdown and wait for the task to exit. A tick still running
    /// after `grace` is aborted.
    pub async fn stop(self, grace: Duration) {
        let _ = self.shutdown.send(true);
        let mut task = self.task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            warn!(
                campaign_id = %self.monitor.campaign_id(),
                grace_ms = grace.as_millis() as u64,
                "Monitor did not stop in time, aborting"
            );
            task.abort();
            let _ = task.await;
        }
    }
}

#[derive(Default)]
pub struct MonitorRegistry {
    monitors: DashMap<String, MonitorHandle>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle, returning the one it replaced.
    pub fn insert(&self, handle: MonitorHandle) -> Option<MonitorHandle> {
        let campaign_id = handle.monitor().campaign_id().to_string();
        self.monitors.insert(campaign_id, handle)
    }

    pub fn remove(&self, campaign_id: &str) -> Option<MonitorHandle> {
        self.monitors.remove(campaign_id).map(|(_, handle)| handle)
    }

    pub fn contains(&self, campaign_id: &str) -> bool {
        self.monitors.contains_key(campaign_id)
    }

    pub fn state(&self, campaign_id: &str) -> Option<Arc<RwLock<MonitorState>>> {
        self.monitors.get(campaign_id).map(|h| h.monitor().state())
    }

    pub fn campaign_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.monitors.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}
