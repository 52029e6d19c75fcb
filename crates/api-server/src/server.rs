//! API server — REST routes over the autopilot service plus the metrics
//! exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post, put};
use axum::Router;
use campaign_core::config::AppConfig;
use campaign_monitor::AutopilotService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the REST router over shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Monitoring
        .route(
            "/v1/campaigns/:campaign_id/monitoring",
            post(rest::start_monitoring).delete(rest::stop_monitoring),
        )
        .route("/v1/campaigns/:campaign_id/snapshot", get(rest::get_snapshot))
        .route("/v1/campaigns/:campaign_id/alerts", get(rest::get_alerts))
        // Budget
        .route("/v1/campaigns/:campaign_id/allocation", get(rest::analyze_allocation))
        .route("/v1/campaigns/:campaign_id/rebalance", post(rest::execute_rebalance))
        .route(
            "/v1/campaigns/:campaign_id/rebalance/simulate",
            post(rest::simulate_rebalance),
        )
        .route(
            "/v1/campaigns/:campaign_id/bids/optimize",
            post(rest::optimize_bids),
        )
        .route(
            "/v1/campaigns/:campaign_id/pending-changes",
            get(rest::pending_changes),
        )
        .route(
            "/v1/campaigns/:campaign_id/budget-history",
            get(rest::budget_history),
        )
        .route(
            "/v1/campaigns/:campaign_id/budget-rules",
            put(rest::set_budget_rules).get(rest::get_budget_rules),
        )
        .route("/v1/approvals/:change_id", post(rest::approve_change))
        .route("/v1/monitors", get(rest::list_monitors))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP front end of the autopilot.
pub struct ApiServer {
    config: AppConfig,
    service: Arc<AutopilotService>,
}

impl ApiServer {
    pub fn new(config: AppConfig, service: Arc<AutopilotService>) -> Self {
        Self { config, service }
    }

    /// Start the HTTP REST server. Returns when `shutdown` resolves.
    pub async fn start_http(
        &self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let state = AppState {
            service: self.service.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };
        let app = router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install_recorder()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");

        // Keep the handle alive
        std::mem::forget(handle);
        Ok(())
    }
}
