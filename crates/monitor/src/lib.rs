//! Campaign performance monitoring — baselines, anomaly detection, trend
//! tracking, per-campaign monitor tasks, and the `AutopilotService` that
//! ties monitoring and budget rebalancing together.

pub mod anomaly;
pub mod baseline;
pub mod monitor;
pub mod registry;
pub mod service;
pub mod trends;

pub use anomaly::{AnomalyDetector, Deviations};
pub use baseline::Baseline;
pub use monitor::{CampaignMonitor, Collaborators, MonitorState, PerformanceSnapshot};
pub use registry::MonitorRegistry;
pub use service::{AutopilotService, MonitorStarted, StopOutcome};
pub use trends::{TrendDirection, TrendHistory, TrendSummary};
