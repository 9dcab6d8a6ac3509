use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::{forward_signals, DaemonContext, HeartbeatManager};
use crate::config::DaemonConfig;
use crate::errors::{FleetError, FleetResult};
use crate::logging::StructuredLogger;
use crate::models::{DaemonKind, DaemonRecord, DaemonStatus};
use crate::store::Store;

/// 守护进程的具体行为（调度器、执行器）
#[async_trait]
pub trait Daemon: Send {
    fn kind(&self) -> DaemonKind;

    /// 在标记 RUNNING 之前调用，返回 false 时拒绝启动
    async fn can_start(&mut self, _ctx: &DaemonContext) -> FleetResult<bool> {
        Ok(true)
    }

    /// 主循环，返回即表示守护进程结束
    async fn run(&mut self, ctx: &DaemonContext) -> FleetResult<()>;

    /// 无论 `run` 如何结束都会调用；返回错误时状态被置为 ERROR
    async fn clean_up(&mut self, _ctx: &DaemonContext) -> FleetResult<()> {
        Ok(())
    }
}

/// 守护进程生命周期：登记、心跳、信号、运行与收尾
pub struct DaemonRuntime<D: Daemon> {
    daemon: D,
    ctx: DaemonContext,
    record: DaemonRecord,
}

impl<D: Daemon> DaemonRuntime<D> {
    /// 在存储中登记一条 CREATED 状态的守护进程记录
    pub async fn register(
        store: Store,
        config: DaemonConfig,
        record: DaemonRecord,
        daemon: D,
    ) -> FleetResult<Self> {
        if record.kind != daemon.kind() {
            return Err(FleetError::Internal(format!(
                "守护进程记录类型 {} 与实现类型 {} 不一致",
                record.kind,
                daemon.kind()
            )));
        }
        let record = store.daemons.create(&record).await?;
        let ctx = DaemonContext::new(record.id, record.kind, record.status, store, config);
        info!(daemon.id = record.id, daemon.kind = %record.kind, "守护进程已登记");
        Ok(Self {
            daemon,
            ctx,
            record,
        })
    }

    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn context(&self) -> &DaemonContext {
        &self.ctx
    }

    pub fn daemon(&self) -> &D {
        &self.daemon
    }

    /// 启动并运行到结束
    ///
    /// 记录不处于 CREATED 时返回 `InvalidDaemonState`；`can_start` 拒绝时返回
    /// `Ok(false)`；正常走完生命周期返回 `Ok(true)`，最终状态见 `context().status()`。
    pub async fn start(&mut self) -> FleetResult<bool> {
        let ctx = self.ctx.clone();
        let store = ctx.store().clone();
        let record = store
            .daemons
            .get_by_id(ctx.id())
            .await?
            .ok_or(FleetError::DaemonNotFound { id: ctx.id() })?;
        if record.status != DaemonStatus::Created {
            return Err(FleetError::InvalidDaemonState {
                status: record.status,
            });
        }

        if !self.daemon.can_start(&ctx).await? {
            warn!(daemon.id = ctx.id(), daemon.kind = %ctx.kind(), "守护进程拒绝启动");
            return Ok(false);
        }

        let signals = if ctx.config().handle_signals {
            Some(forward_signals(ctx.clone())?)
        } else {
            None
        };

        store.daemons.mark_started(ctx.id(), Utc::now()).await?;
        ctx.set_status(DaemonStatus::Running).await?;
        StructuredLogger::log_daemon_started(ctx.kind(), ctx.id(), &record.host, record.pid);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let heartbeat = HeartbeatManager::new(
            ctx.id(),
            store.daemons.clone(),
            ctx.config().heartbeat_interval(),
        )
        .start(shutdown_rx);

        let outcome = AssertUnwindSafe(self.daemon.run(&ctx)).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {
                if !ctx.status().await.is_final() {
                    Self::persist_status(&ctx, DaemonStatus::Ended).await;
                }
            }
            Ok(Err(e)) => {
                error!(daemon.id = ctx.id(), "守护进程主循环出错: {}", e);
                Self::persist_status(&ctx, DaemonStatus::Error).await;
            }
            Err(_) => {
                error!(daemon.id = ctx.id(), "守护进程主循环发生 panic");
                Self::persist_status(&ctx, DaemonStatus::Error).await;
            }
        }

        // 收尾顺序：停止心跳 → 清理 → 记录结束时间
        let _ = shutdown_tx.send(());
        if let Err(e) = heartbeat.await {
            error!(daemon.id = ctx.id(), "心跳任务异常退出: {}", e);
        }

        let cleaned = AssertUnwindSafe(self.daemon.clean_up(&ctx))
            .catch_unwind()
            .await;
        match cleaned {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(daemon.id = ctx.id(), "守护进程清理失败: {}", e);
                Self::persist_status(&ctx, DaemonStatus::Error).await;
            }
            Err(_) => {
                error!(daemon.id = ctx.id(), "守护进程清理发生 panic");
                Self::persist_status(&ctx, DaemonStatus::Error).await;
            }
        }

        store.daemons.mark_ended(ctx.id(), Utc::now()).await?;
        if let Some(signals) = signals {
            signals.abort();
        }

        StructuredLogger::log_daemon_ended(ctx.kind(), ctx.id(), ctx.status().await);
        Ok(true)
    }

    async fn persist_status(ctx: &DaemonContext, status: DaemonStatus) {
        if let Err(e) = ctx.set_status(status).await {
            error!(daemon.id = ctx.id(), status = %status, "保存守护进程状态失败: {}", e);
        }
    }
}
