//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;

use super::counters::{MetricsSnapshot, METRICS};
use crate::config::MetricsConfig;

/// Initialize the Prometheus metrics exporter
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    describe_counter!("rabbitpool_connections_constructed", "Connections built");
    describe_counter!("rabbitpool_connections_opened", "Successful handshakes");
    describe_counter!("rabbitpool_connections_failed", "Handshakes that gave up");
    describe_counter!("rabbitpool_connections_closed", "Open connections that closed");
    describe_gauge!("rabbitpool_connections_active", "Currently open connections");
    describe_counter!("rabbitpool_connections_replaced", "Closed connections rebuilt on lookup");

    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    tokio::spawn(sync_metrics_task());

    Ok(())
}

/// Periodically push the atomic counters into the metrics recorder
async fn sync_metrics_task() {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut last = MetricsSnapshot::default();

    loop {
        interval.tick().await;
        let snapshot = METRICS.snapshot();

        let deltas = [
            ("rabbitpool_connections_constructed", snapshot.connections_constructed, last.connections_constructed),
            ("rabbitpool_connections_opened", snapshot.connections_opened, last.connections_opened),
            ("rabbitpool_connections_failed", snapshot.connections_failed, last.connections_failed),
            ("rabbitpool_connections_closed", snapshot.connections_closed, last.connections_closed),
            ("rabbitpool_connections_replaced", snapshot.connections_replaced, last.connections_replaced),
        ];
        for (name, now, before) in deltas {
            let delta = now.saturating_sub(before);
            if delta > 0 {
                counter!(name).increment(delta);
            }
        }

        gauge!("rabbitpool_connections_active").set(snapshot.connections_active as f64);

        last = snapshot;
    }
}
