use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tracing::{debug, info};

use crate::config::DaemonConfig;
use crate::errors::FleetResult;
use crate::models::{DaemonKind, DaemonStatus, Request};
use crate::store::Store;

/// 守护进程运行期间共享的上下文
///
/// 状态以内存中的值为准，每次变化都会写回存储。`wait` 在轮询周期到期或
/// 收到 `wake` 时返回。
#[derive(Clone)]
pub struct DaemonContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: i64,
    kind: DaemonKind,
    store: Store,
    config: DaemonConfig,
    status: RwLock<DaemonStatus>,
    wake: Notify,
}

impl DaemonContext {
    pub fn new(
        id: i64,
        kind: DaemonKind,
        status: DaemonStatus,
        store: Store,
        config: DaemonConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                kind,
                store,
                config,
                status: RwLock::new(status),
                wake: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> i64 {
        self.inner.id
    }

    pub fn kind(&self) -> DaemonKind {
        self.inner.kind
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.inner.config
    }

    pub async fn status(&self) -> DaemonStatus {
        *self.inner.status.read().await
    }

    pub async fn set_status(&self, status: DaemonStatus) -> FleetResult<()> {
        let mut current = self.inner.status.write().await;
        if *current == status {
            return Ok(());
        }
        self.inner
            .store
            .daemons
            .update_status(self.inner.id, status)
            .await?;
        let previous = *current;
        info!(
            daemon.id = self.inner.id,
            from = %previous,
            to = %status,
            "守护进程状态变更"
        );
        *current = status;
        Ok(())
    }

    /// 读取存储中尚未处理的请求
    pub async fn pending_request(&self) -> FleetResult<Option<Request>> {
        let record = self.inner.store.daemons.get_by_id(self.inner.id).await?;
        Ok(record.and_then(|r| r.request))
    }

    /// 只清除已读到的请求，期间写入的新请求保留
    pub async fn clear_request(&self, seen: Request) -> FleetResult<bool> {
        let cleared = self
            .inner
            .store
            .daemons
            .clear_request(self.inner.id, seen)
            .await?;
        if !cleared {
            debug!(
                daemon.id = self.inner.id,
                request = %seen,
                "请求在处理期间已被替换，保留新请求"
            );
        }
        Ok(cleared)
    }

    /// 向本守护进程写入请求并唤醒主循环
    pub async fn make_request(&self, request: Request) -> FleetResult<bool> {
        let accepted = self
            .inner
            .store
            .daemons
            .make_request(self.inner.id, request)
            .await?;
        if accepted {
            self.wake();
        }
        Ok(accepted)
    }

    pub fn wake(&self) {
        self.inner.wake.notify_one();
    }

    /// 睡眠一个周期，被唤醒时提前返回
    pub async fn wait(&self, period: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = self.inner.wake.notified() => {}
        }
    }

    pub async fn wait_poll_period(&self) {
        self.wait(self.inner.config.poll_interval()).await
    }
}
