//! Scrape-time collector: one session read per scrape, mapped to families.

use std::sync::Arc;

use jetsight_common::current_timestamp_secs;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::exposition;
use crate::mapping::{MetricFamily, build_metric_name, map_snapshot};
use crate::session::{ReconnectOutcome, TelemetrySession};

/// Thread-safe collector driven by incoming scrapes.
pub struct TelemetryCollector {
    /// Session shared with the process lifecycle, which closes it.
    session: Arc<TelemetrySession>,
    /// Metric name prefix.
    prefix: String,
    /// Append self-metrics to rendered output.
    exporter_metrics: bool,
    /// Statistics.
    stats: RwLock<CollectorStats>,
}

/// Collector statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Total collect invocations.
    pub scrapes: u64,
    /// Scrapes that produced no families.
    pub empty_scrapes: u64,
    /// Scrapes whose snapshot read failed.
    pub read_failures: u64,
    /// Reconnects tried while the session was unready.
    pub reconnect_attempts: u64,
    /// Reconnects that made the session ready again.
    pub reconnect_successes: u64,
    /// Unix time of the last scrape that produced metrics.
    pub last_success_secs: Option<u64>,
}

impl TelemetryCollector {
    /// Create a collector reading from `session`.
    pub fn new(
        session: Arc<TelemetrySession>,
        prefix: impl Into<String>,
        exporter_metrics: bool,
    ) -> Self {
        Self {
            session,
            prefix: prefix.into(),
            exporter_metrics,
            stats: RwLock::new(CollectorStats::default()),
        }
    }

    /// Produce the families for one scrape. Never fails.
    ///
    /// An unready session that cannot reconnect, or a failed read, yields
    /// an empty list for this scrape only.
    pub async fn collect(&self) -> Vec<MetricFamily> {
        self.stats.write().scrapes += 1;

        if !self.session.is_ready() && !self.reconnect().await {
            trace!("Session not ready, empty scrape");
            self.stats.write().empty_scrapes += 1;
            return Vec::new();
        }

        let snapshot = match self.session.read_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Snapshot read failed, skipping scrape");
                let mut stats = self.stats.write();
                stats.read_failures += 1;
                stats.empty_scrapes += 1;
                return Vec::new();
            }
        };

        let families = map_snapshot(&snapshot, &self.prefix);
        self.stats.write().last_success_secs = Some(current_timestamp_secs());
        debug!(families = families.len(), "Scrape collected");
        families
    }

    /// Collect and render in text exposition format.
    pub async fn render(&self) -> String {
        let mut families = self.collect().await;
        if self.exporter_metrics {
            families.extend(self.self_metrics());
        }
        exposition::encode(&families)
    }

    /// Whether the underlying session can currently serve reads.
    pub fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    /// Get collector statistics.
    pub fn stats(&self) -> CollectorStats {
        self.stats.read().clone()
    }

    /// One reconnect attempt; returns whether the session can be read.
    async fn reconnect(&self) -> bool {
        let outcome = self.session.try_reconnect().await;

        let mut stats = self.stats.write();
        match outcome {
            ReconnectOutcome::Reconnected => {
                stats.reconnect_attempts += 1;
                stats.reconnect_successes += 1;
            }
            ReconnectOutcome::Failed => stats.reconnect_attempts += 1,
            ReconnectOutcome::AlreadyReady | ReconnectOutcome::Skipped => {}
        }
        outcome.is_ready()
    }

    /// Scrape counters exposed alongside the board metrics.
    fn self_metrics(&self) -> Vec<MetricFamily> {
        let stats = self.stats();
        let name = |suffix: &str| build_metric_name(&self.prefix, suffix);
        let successes = stats.scrapes.saturating_sub(stats.empty_scrapes);
        let not_ready = stats.empty_scrapes.saturating_sub(stats.read_failures);
        let endpoint = self.session.endpoint();

        vec![
            MetricFamily::counter(
                name("exporter_scrapes"),
                "Scrapes served, by outcome",
                "result",
                &[
                    ("success", successes as f64),
                    ("not_ready", not_ready as f64),
                    ("read_error", stats.read_failures as f64),
                ],
            ),
            MetricFamily::counter(
                name("exporter_reconnects"),
                "Reconnection attempts to the telemetry source, by outcome",
                "result",
                &[
                    ("success", stats.reconnect_successes as f64),
                    (
                        "failure",
                        stats.reconnect_attempts.saturating_sub(stats.reconnect_successes) as f64,
                    ),
                ],
            ),
            MetricFamily::gauge(
                name("exporter_source_ready"),
                "Whether the telemetry source is ready",
                "endpoint",
                &[(endpoint, if self.session.is_ready() { 1.0 } else { 0.0 })],
            ),
            MetricFamily::gauge(
                name("exporter_last_success_timestamp_seconds"),
                "Unix time of the last scrape that produced metrics",
                "endpoint",
                &[(endpoint, stats.last_success_secs.unwrap_or(0) as f64)],
            ),
        ]
    }
}

/// Create a shareable collector handle.
pub type SharedCollector = Arc<TelemetryCollector>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReconnectConfig, SourceConfig};
    use crate::fake::{FetchStep, ScriptedSource, StaticHost};
    use jetsight_common::{DiskUsage, FanReading, RailReading, SourceReading};

    fn scenario_reading() -> SourceReading {
        let mut reading = SourceReading {
            fan: Some(FanReading { speed: 40.0 }),
            ..Default::default()
        };
        reading.temperature.insert("GPU".to_string(), 55.0);
        reading.power.rails.insert(
            "SOC".to_string(),
            RailReading {
                cur: 3000.0,
                avg: 2900.0,
            },
        );
        reading
    }

    fn scenario_host() -> StaticHost {
        StaticHost::new("alice", "node1").with_disk(DiskUsage {
            free: 50_000_000_000,
            total: 100_000_000_000,
            used: 50_000_000_000,
            percent: 50.0,
        })
    }

    fn source_config(reconnect: bool) -> SourceConfig {
        SourceConfig {
            connect_timeout_ms: 50,
            read_timeout_ms: 50,
            reconnect: ReconnectConfig {
                enabled: reconnect,
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
            },
            ..Default::default()
        }
    }

    async fn make_collector(
        source: &ScriptedSource,
        reconnect: bool,
        exporter_metrics: bool,
    ) -> (Arc<TelemetrySession>, TelemetryCollector) {
        let session = TelemetrySession::open(
            Box::new(source.clone()),
            Box::new(scenario_host()),
            &source_config(reconnect),
        )
        .await
        .unwrap();
        let session = Arc::new(session);
        let collector = TelemetryCollector::new(session.clone(), "jetson", exporter_metrics);
        (session, collector)
    }

    #[tokio::test]
    async fn test_collect_scenario() {
        let source = ScriptedSource::steady(scenario_reading());
        let (session, collector) = make_collector(&source, true, false).await;

        let families = collector.collect().await;
        assert_eq!(families.len(), 7);

        let board = &families[0];
        assert_eq!(board.name, "jetson_info_board");
        assert!(board.samples[0]
            .labels
            .contains(&("username".to_string(), "alice".to_string())));
        assert!(board.samples[0]
            .labels
            .contains(&("hostname".to_string(), "node1".to_string())));

        let disk = &families[3];
        assert_eq!(disk.sample_value("disk", "free"), Some(50.0));
        assert_eq!(disk.sample_value("disk", "total"), Some(100.0));
        assert_eq!(disk.sample_value("disk", "used"), Some(50.0));
        assert_eq!(disk.sample_value("disk", "percent"), Some(50.0));

        assert_eq!(families[4].sample_value("fan", "speed"), Some(40.0));
        assert_eq!(families[5].sample_value("temperature", "gpu"), Some(55.0));
        assert_eq!(families[5].sample_value("temperature", "thermal"), Some(0.0));
        assert_eq!(families[6].sample_value("power", "soc"), Some(3000.0));

        let stats = collector.stats();
        assert_eq!(stats.scrapes, 1);
        assert_eq!(stats.empty_scrapes, 0);
        assert!(stats.last_success_secs.is_some());

        session.close().await;
    }

    #[tokio::test]
    async fn test_collect_not_ready_is_empty() {
        let source = ScriptedSource::steady(scenario_reading());
        let (session, collector) = make_collector(&source, false, false).await;

        source.push(FetchStep::Fail("daemon stopped".to_string()));
        assert!(collector.collect().await.is_empty());
        assert!(!collector.is_ready());

        let fetches = source.calls().fetches;
        assert!(collector.collect().await.is_empty());
        assert_eq!(collector.render().await, "");
        // No read is attempted while unready
        assert_eq!(source.calls().fetches, fetches);

        let stats = collector.stats();
        assert_eq!(stats.scrapes, 3);
        assert_eq!(stats.empty_scrapes, 3);
        assert_eq!(stats.read_failures, 1);
        assert_eq!(stats.reconnect_attempts, 0);

        session.close().await;
    }

    #[tokio::test]
    async fn test_failed_read_empties_only_that_scrape() {
        let source = ScriptedSource::steady(scenario_reading());
        let (session, collector) = make_collector(&source, true, false).await;

        source.push(FetchStep::Fail("socket reset".to_string()));
        let sizes = [
            collector.collect().await.len(),
            collector.collect().await.len(),
            collector.collect().await.len(),
        ];

        // The next scrape reconnects and reads in one go
        assert_eq!(sizes, [0, 7, 7]);
        assert!(collector.is_ready());

        let stats = collector.stats();
        assert_eq!(stats.read_failures, 1);
        assert_eq!(stats.reconnect_attempts, 1);
        assert_eq!(stats.reconnect_successes, 1);
        assert_eq!(stats.empty_scrapes, 1);

        session.close().await;
    }

    #[tokio::test]
    async fn test_failed_reconnect_is_counted() {
        let source = ScriptedSource::steady(scenario_reading());
        let (session, collector) = make_collector(&source, true, false).await;

        source.push(FetchStep::Fail("socket reset".to_string()));
        assert!(collector.collect().await.is_empty());

        source.fail_connects(1);
        assert!(collector.collect().await.is_empty());
        assert!(!collector.is_ready());

        let stats = collector.stats();
        assert_eq!(stats.reconnect_attempts, 1);
        assert_eq!(stats.reconnect_successes, 0);

        session.close().await;
    }

    #[tokio::test]
    async fn test_render_is_idempotent() {
        let source = ScriptedSource::steady(scenario_reading());
        let (session, collector) = make_collector(&source, true, false).await;

        let first = collector.render().await;
        let second = collector.render().await;

        assert_eq!(first, second);
        assert!(first.contains("jetson_info_board_info{board_info=\"info\",username=\"alice\",hostname=\"node1\"} 1"));
        assert!(first.contains("jetson_usage_power{power=\"soc\"} 3000"));
        assert!(!first.contains("exporter_"));

        session.close().await;
    }

    #[tokio::test]
    async fn test_render_with_exporter_metrics() {
        let source = ScriptedSource::steady(scenario_reading());
        let (session, collector) = make_collector(&source, true, true).await;

        let output = collector.render().await;

        assert!(output.contains("# TYPE jetson_exporter_scrapes counter"));
        assert!(output.contains("jetson_exporter_scrapes_total{result=\"success\"} 1"));
        assert!(output.contains("jetson_exporter_scrapes_total{result=\"not_ready\"} 0"));
        assert!(output.contains("jetson_exporter_source_ready{endpoint=\"scripted\"} 1"));

        session.close().await;
    }

    #[tokio::test]
    async fn test_closed_session_yields_empty() {
        let source = ScriptedSource::steady(scenario_reading());
        let (session, collector) = make_collector(&source, true, false).await;

        session.close().await;

        assert!(collector.collect().await.is_empty());
        assert_eq!(source.calls().connects, 1);
    }
}
