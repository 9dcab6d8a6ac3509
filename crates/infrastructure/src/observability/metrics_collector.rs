//! 集群指标
//!
//! 使用 `metrics` 门面记录，启用 `observability.metrics_enabled` 时由
//! Prometheus 导出器通过 HTTP 暴露。

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{counter, gauge, Counter, Gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use taskfleet_core::InstanceStatus;
use tracing::info;

/// 安装 Prometheus 记录器并监听指定地址，需要在 tokio 运行时内调用
pub fn install_prometheus(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    info!("Prometheus metrics exporter listening on {}", addr);
    Ok(())
}

/// 调度器与执行器共用的指标句柄
#[derive(Clone)]
pub struct FleetMetrics {
    instances_enqueued_total: Counter,
    schedules_claimed_total: Counter,
    schedules_released_total: Counter,
    live_subprocesses: Gauge,
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self {
            instances_enqueued_total: counter!("taskfleet_instances_enqueued_total"),
            schedules_claimed_total: counter!("taskfleet_schedules_claimed_total"),
            schedules_released_total: counter!("taskfleet_schedules_released_total"),
            live_subprocesses: gauge!("taskfleet_live_subprocesses"),
        }
    }

    pub fn record_enqueued(&self) {
        self.instances_enqueued_total.increment(1);
    }

    pub fn record_claimed(&self, count: u64) {
        self.schedules_claimed_total.increment(count);
    }

    pub fn record_released(&self, count: u64) {
        self.schedules_released_total.increment(count);
    }

    /// 按最终状态计数
    pub fn record_finished(&self, status: InstanceStatus) {
        counter!("taskfleet_instances_finished_total", "status" => status.as_str()).increment(1);
    }

    pub fn set_live_subprocesses(&self, live: usize) {
        self.live_subprocesses.set(live as f64);
    }
}

impl Default for FleetMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        let metrics = FleetMetrics::new();
        metrics.record_enqueued();
        metrics.record_claimed(3);
        metrics.record_released(3);
        metrics.record_finished(InstanceStatus::TimedOut);
        metrics.set_live_subprocesses(2);
    }

    #[test]
    fn test_invalid_bind_address() {
        assert!(install_prometheus("not-an-address").is_err());
    }
}
