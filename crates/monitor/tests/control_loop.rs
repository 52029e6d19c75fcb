//! End-to-end tests of the control loop against the in-memory collaborators.

#[cfg(test)]
mod tests {
    use campaign_budget::rebalancer::ChangeStatus;
    use campaign_budget::RebalanceOptions;
    use campaign_core::memory::{
        InMemoryCampaignStore, InMemoryMetricsSource, RecordingActionExecutor,
        RecordingNotificationSink,
    };
    use campaign_core::rules::{BudgetRules, MonitorConfig};
    use campaign_core::types::{
        AlertMetric, AlertSeverity, AutomatedAction, BudgetAction, Campaign, CampaignStatus,
        ChannelStatus, MetricsSnapshot, PerformanceCounters, PlatformChannel,
    };
    use campaign_core::CampaignError;
    use campaign_monitor::{AutopilotService, Collaborators, StopOutcome};
    use chrono::{DateTime, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        store: Arc<InMemoryCampaignStore>,
        metrics: Arc<InMemoryMetricsSource>,
        sink: Arc<RecordingNotificationSink>,
        actions: Arc<RecordingActionExecutor>,
        service: AutopilotService,
    }

    fn channel(platform: &str, budget: f64, counters: PerformanceCounters) -> PlatformChannel {
        PlatformChannel {
            platform: platform.to_string(),
            daily_budget: budget,
            status: ChannelStatus::Active,
            performance: counters,
        }
    }

    /// google_ads at ROAS 5.0 with strong engagement, facebook_ads at
    /// ROAS 2.0 with weak engagement.
    fn two_platform_campaign() -> Campaign {
        Campaign {
            id: "alumni-spring".into(),
            name: "Alumni Spring Drive".into(),
            daily_budget: 500.0,
            status: CampaignStatus::Active,
            platforms: vec![
                channel(
                    "google_ads",
                    300.0,
                    PerformanceCounters {
                        impressions: 40_000,
                        clicks: 1_200,
                        conversions: 60,
                        cost: 1_500.0,
                        revenue: 7_500.0,
                    },
                ),
                channel(
                    "facebook_ads",
                    200.0,
                    PerformanceCounters {
                        impressions: 50_000,
                        clicks: 250,
                        conversions: 2,
                        cost: 1_000.0,
                        revenue: 2_000.0,
                    },
                ),
            ],
            budget_history: Vec::new(),
        }
    }

    fn counters(roas: f64) -> PerformanceCounters {
        PerformanceCounters {
            impressions: 10_000,
            clicks: 250,
            conversions: 8,
            cost: 100.0,
            revenue: 100.0 * roas,
        }
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryCampaignStore::new());
        store.insert(two_platform_campaign());
        let metrics = Arc::new(InMemoryMetricsSource::new());
        let sink = Arc::new(RecordingNotificationSink::new());
        let actions = Arc::new(RecordingActionExecutor::new());

        let deps = Collaborators {
            store: store.clone(),
            metrics: metrics.clone(),
            notifications: sink.clone(),
            actions: actions.clone(),
        };
        let service = AutopilotService::new(deps, BudgetRules::default(), MonitorConfig::default());
        Harness {
            store,
            metrics,
            sink,
            actions,
            service,
        }
    }

    /// Noon UTC today, so spend pacing never trips regardless of when the
    /// test runs.
    fn noon_today() -> DateTime<Utc> {
        Utc::now()
            .date_naive()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn seed_history(metrics: &InMemoryMetricsSource, roas: f64) {
        let now = Utc::now();
        metrics.set_history(
            "alumni-spring",
            (1..=20)
                .map(|h| {
                    MetricsSnapshot::new("all", now - chrono::Duration::hours(h), counters(roas))
                })
                .collect(),
        );
    }

    // ─── Budget path ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_two_platform_rebalance_end_to_end() {
        let h = harness();

        let analysis = h.service.analyze_budget_allocation("alumni-spring").await.unwrap();
        assert_eq!(analysis.confidence, 85.0);
        let google = analysis
            .recommendations
            .iter()
            .find(|r| r.platform == "google_ads")
            .unwrap();
        let facebook = analysis
            .recommendations
            .iter()
            .find(|r| r.platform == "facebook_ads")
            .unwrap();
        assert_eq!(google.action, BudgetAction::Increase);
        assert_eq!(facebook.action, BudgetAction::Decrease);

        let execution = h
            .service
            .execute_rebalance("alumni-spring", RebalanceOptions::default())
            .await
            .unwrap();
        assert!(execution
            .executed
            .iter()
            .all(|c| c.status == ChangeStatus::Success));
        assert!(execution.expected_impact.roas_improvement_pct > 0.0);

        let history = h.service.get_budget_history("alumni-spring").await.unwrap();
        assert_eq!(history.len(), 2);
        let stored = h.store.snapshot("alumni-spring").unwrap();
        assert!(stored.allocated_budget() <= 400.0);

        // Inside the cooldown: rejected, nothing mutated.
        let again = h
            .service
            .execute_rebalance("alumni-spring", RebalanceOptions::default())
            .await;
        assert!(matches!(again, Err(CampaignError::Cooldown { .. })));
        assert_eq!(h.service.get_budget_history("alumni-spring").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_simulation_leaves_store_untouched() {
        let h = harness();
        let preview = h.service.simulate_rebalance("alumni-spring").await.unwrap();
        assert!(preview.dry_run);
        assert_eq!(preview.pending.len(), 2);
        assert!(h.service.get_budget_history("alumni-spring").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emergency_roas_pauses_platform() {
        let h = harness();
        let mut campaign = two_platform_campaign();
        campaign.platforms[1].performance.revenue = 1_200.0;
        h.store.insert(campaign);

        let execution = h
            .service
            .execute_rebalance("alumni-spring", RebalanceOptions::default())
            .await
            .unwrap();
        let paused = execution
            .executed
            .iter()
            .find(|c| c.platform == "facebook_ads")
            .unwrap();
        assert_eq!(paused.action, BudgetAction::Pause);
        assert_eq!(paused.new_budget, 0.0);

        let stored = h.store.snapshot("alumni-spring").unwrap();
        assert_eq!(
            stored.platform("facebook_ads").unwrap().status,
            ChannelStatus::Paused
        );
    }

    // ─── Monitoring path ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_monitor_detects_roas_drop_and_mitigates() {
        let h = harness();
        seed_history(&h.metrics, 4.0);
        h.metrics.set_current(
            "alumni-spring",
            MetricsSnapshot::new("all", noon_today(), counters(2.6)),
        );

        let config = MonitorConfig {
            interval_ms: 20,
            ..MonitorConfig::default()
        };
        let started = h.service.start_monitoring("alumni-spring", Some(config)).await.unwrap();
        assert!(started.baseline_established);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(h.service.stop_monitoring("alumni-spring").await, StopOutcome::Stopped);

        let delivered = h.sink.delivered();
        assert!(!delivered.is_empty());
        assert!(delivered.iter().all(|a| a.metric == AlertMetric::Roas
            && a.severity == AlertSeverity::Critical));
        assert!(h
            .actions
            .invoked()
            .iter()
            .all(|r| r.action == AutomatedAction::PauseLowPerformers));

        // Stopped monitors are gone; a second stop is a no-op.
        let ticks = h.sink.delivered().len();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(h.sink.delivered().len(), ticks);
        assert_eq!(h.service.stop_monitoring("alumni-spring").await, StopOutcome::NotFound);
        assert!(matches!(
            h.service.get_alerts("alumni-spring"),
            Err(CampaignError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_steady_campaign_produces_no_alerts() {
        let h = harness();
        seed_history(&h.metrics, 4.0);
        h.metrics.set_current(
            "alumni-spring",
            MetricsSnapshot::new("all", noon_today(), counters(4.0)),
        );

        let config = MonitorConfig {
            interval_ms: 20,
            ..MonitorConfig::default()
        };
        h.service.start_monitoring("alumni-spring", Some(config)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snapshot = h.service.get_performance_snapshot("alumni-spring").unwrap();
        assert!(snapshot.tick_count >= 1);
        assert!(snapshot.active_alerts.is_empty());
        assert!(h.service.get_alerts("alumni-spring").unwrap().is_empty());

        h.service.shutdown().await;
        assert!(h.sink.delivered().is_empty());
    }
}
