//! Campaign Autopilot — autonomous budget reallocation and performance
//! anomaly monitoring for multi-platform ad campaigns.
//!
//! Main entry point that wires the collaborators, starts monitoring and
//! serves the REST API.

mod seed;

use campaign_api::ApiServer;
use campaign_core::config::AppConfig;
use campaign_core::memory::{
    InMemoryCampaignStore, InMemoryMetricsSource, RecordingActionExecutor,
    RecordingNotificationSink,
};
use campaign_monitor::{AutopilotService, Collaborators};
use clap::Parser;
use seed::SeedFile;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_LOG_FILTER: &str =
    "campaign_autopilot=info,campaign_monitor=info,campaign_budget=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(name = "campaign-autopilot")]
#[command(about = "Autonomous ad budget reallocation and performance anomaly monitoring")]
#[command(version)]
struct Cli {
    /// Config file (TOML, YAML or JSON)
    #[arg(long, short)]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPAIGN_AUTOPILOT__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CAMPAIGN_AUTOPILOT__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics port (overrides config)
    #[arg(long, env = "CAMPAIGN_AUTOPILOT__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Seed file of campaigns and metrics (overrides config)
    #[arg(long)]
    seed: Option<String>,

    /// Start monitoring every seeded campaign on boot
    #[arg(long, default_value_t = false)]
    autostart: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Campaign Autopilot starting up");

    // Load configuration
    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) if cli.config.is_some() => return Err(e.into()),
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }
    };

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if cli.seed.is_some() {
        config.seed.path = cli.seed;
    }
    if cli.autostart {
        config.seed.autostart_monitoring = true;
    }
    config.validate()?;

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        monitor_interval_ms = config.monitor.interval_ms,
        "Configuration loaded"
    );

    // In-process collaborators
    let store = Arc::new(InMemoryCampaignStore::new());
    let metrics = Arc::new(InMemoryMetricsSource::new());
    let seeded = match &config.seed.path {
        Some(path) => {
            let ids = SeedFile::read(path)?.load_into(&store, &metrics, chrono::Utc::now());
            info!(path = %path, campaigns = ids.len(), "Seed data loaded");
            ids
        }
        None => Vec::new(),
    };

    let deps = Collaborators {
        store,
        metrics,
        notifications: Arc::new(RecordingNotificationSink::new()),
        actions: Arc::new(RecordingActionExecutor::new()),
    };
    let service = Arc::new(AutopilotService::new(
        deps,
        config.budget.clone(),
        config.monitor.clone(),
    ));

    let api_server = ApiServer::new(config.clone(), service.clone());

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    if config.seed.autostart_monitoring {
        for campaign_id in &seeded {
            if let Err(e) = service.start_monitoring(campaign_id, None).await {
                error!(campaign_id = %campaign_id, error = %e, "Failed to start monitoring");
            }
        }
    }

    info!("Campaign Autopilot is ready to serve traffic");

    // Serve until ctrl-c
    let result = api_server
        .start_http(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await;

    service.shutdown().await;
    info!("Campaign Autopilot stopped");

    result
}
