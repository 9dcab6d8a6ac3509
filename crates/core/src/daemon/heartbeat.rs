use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::traits::DaemonRepository;

/// 周期性写入心跳
///
/// 每轮睡眠时长扣除写入耗时，存储变慢时心跳间隔仍保持稳定。
pub struct HeartbeatManager {
    daemon_id: i64,
    repository: Arc<dyn DaemonRepository>,
    interval: Duration,
}

impl HeartbeatManager {
    pub fn new(daemon_id: i64, repository: Arc<dyn DaemonRepository>, interval: Duration) -> Self {
        Self {
            daemon_id,
            repository,
            interval,
        }
    }

    pub fn start(&self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let repository = Arc::clone(&self.repository);
        let daemon_id = self.daemon_id;
        let interval = self.interval;

        tokio::spawn(async move {
            loop {
                let started = Instant::now();
                match repository.heartbeat(daemon_id, Utc::now()).await {
                    Ok(true) => debug!(daemon.id = daemon_id, "心跳已写入"),
                    Ok(false) => {
                        warn!(daemon.id = daemon_id, "守护进程已处于终态，停止心跳");
                        break;
                    }
                    Err(e) => error!(daemon.id = daemon_id, "写入心跳失败: {}", e),
                }

                let spent = started.elapsed();
                if spent >= interval {
                    warn!(
                        daemon.id = daemon_id,
                        spent_ms = spent.as_millis() as u64,
                        "写入心跳耗时超过心跳间隔"
                    );
                }
                let pause = interval.saturating_sub(spent);
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown_rx.recv() => {
                        info!(daemon.id = daemon_id, "心跳任务停止");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FleetResult;
    use crate::models::{DaemonKind, DaemonRecord, DaemonStatus, Request};
    use async_trait::async_trait;
    use chrono::DateTime;
    use mockall::mock;

    mock! {
        Daemons {}

        #[async_trait]
        impl DaemonRepository for Daemons {
            async fn create(&self, daemon: &DaemonRecord) -> FleetResult<DaemonRecord>;
            async fn get_by_id(&self, id: i64) -> FleetResult<Option<DaemonRecord>>;
            async fn update_status(&self, id: i64, status: DaemonStatus) -> FleetResult<()>;
            async fn mark_started(&self, id: i64, at: DateTime<Utc>) -> FleetResult<()>;
            async fn mark_ended(&self, id: i64, at: DateTime<Utc>) -> FleetResult<()>;
            async fn heartbeat(&self, id: i64, at: DateTime<Utc>) -> FleetResult<bool>;
            async fn make_request(&self, id: i64, request: Request) -> FleetResult<bool>;
            async fn clear_request(&self, id: i64, seen: Request) -> FleetResult<bool>;
            async fn list_alive(
                &self,
                kind: DaemonKind,
                now: DateTime<Utc>,
                failure_window: chrono::Duration,
            ) -> FleetResult<Vec<DaemonRecord>>;
            async fn handle(
                &self,
                id: i64,
                now: DateTime<Utc>,
                failure_window: chrono::Duration,
            ) -> FleetResult<bool>;
        }
    }

    #[tokio::test]
    async fn test_heartbeat_stops_when_daemon_is_final() {
        let mut repo = MockDaemons::new();
        repo.expect_heartbeat()
            .withf(|id, _| *id == 7)
            .times(1)
            .returning(|_, _| Ok(false));

        let (_tx, rx) = broadcast::channel(1);
        let handle =
            HeartbeatManager::new(7, Arc::new(repo), Duration::from_millis(10)).start(rx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_survives_store_errors_until_shutdown() {
        let mut repo = MockDaemons::new();
        repo.expect_heartbeat()
            .times(1..)
            .returning(|_, _| Err(crate::errors::FleetError::Internal("store down".into())));

        let (tx, rx) = broadcast::channel(1);
        let handle =
            HeartbeatManager::new(1, Arc::new(repo), Duration::from_millis(5)).start(rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
