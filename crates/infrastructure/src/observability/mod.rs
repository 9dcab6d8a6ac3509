//! 可观测性：Prometheus 指标

pub mod metrics_collector;

pub use metrics_collector::{install_prometheus, FleetMetrics};
