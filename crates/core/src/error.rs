use chrono::{DateTime, Utc};
use thiserror::Error;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cooldown period active for campaign {campaign_id}, next rebalance at {next_eligible}")]
    Cooldown {
        campaign_id: String,
        next_eligible: DateTime<Utc>,
    },

    #[error("Insufficient data: {available} data points available, {required} required")]
    InsufficientData { required: usize, available: usize },

    #[error("External call failed: {0}")]
    External(String),

    #[error("External call timed out after {0}ms: {1}")]
    Timeout(u64, String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CampaignError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// True for failures of a collaborator call, which a monitor tick
    /// recovers from locally.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_) | Self::Timeout(..))
    }
}
