//! Metrics and observability
//!
//! Prometheus-compatible metrics backed by atomic lifecycle counters.

mod counters;
mod exporter;

pub use counters::*;
pub use exporter::init_metrics;
