pub mod config;
pub mod error;
pub mod memory;
pub mod ports;
pub mod rules;
pub mod types;

pub use config::AppConfig;
pub use error::{CampaignError, CampaignResult};
pub use ports::{ActionExecutor, CampaignStore, MetricsSource, NotificationSink};
pub use rules::{BudgetRules, MonitorConfig, MonitorThresholds, PlatformRules};
