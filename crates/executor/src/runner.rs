use std::future::Future;
use std::time::Duration;

use taskfleet_core::{
    FleetResult, InstanceStatus, Store, StructuredLogger, TaskContext, TaskHandler, TaskRegistry,
};
use tracing::{error, info, warn};

use crate::handlers::advance_dependents;

/// 在子进程中运行单个任务实例
///
/// 实例先置为 RUNNING，然后处理器的运行、任务超时与中断信号三者竞争：
/// - 处理器返回 `Ok(true)` 记为 SUCCESS，`Ok(false)` 或出错记为 FAILURE
/// - 超时记为 TIMEDOUT，中断记为 INTERRUPTED，两者都会在收尾时限内运行处理器的收尾动作
///
/// 作业节点成功后推进其子节点。
pub struct InstanceRunner {
    store: Store,
    registry: TaskRegistry,
    finalizer_timeout: Duration,
}

enum Outcome {
    Finished(FleetResult<bool>),
    TimedOut,
    Interrupted,
}

impl InstanceRunner {
    pub fn new(store: Store, registry: TaskRegistry, finalizer_timeout: Duration) -> Self {
        Self {
            store,
            registry,
            finalizer_timeout,
        }
    }

    /// 运行实例，SIGINT/SIGTERM 视为中断
    pub async fn run(&self, instance_id: i64) -> FleetResult<InstanceStatus> {
        self.run_until(instance_id, termination_signal()).await
    }

    /// 运行实例，`interrupt` 完成即视为中断；返回实例的最终状态
    pub async fn run_until<F>(&self, instance_id: i64, interrupt: F) -> FleetResult<InstanceStatus>
    where
        F: Future<Output = ()>,
    {
        let instance = self.store.get_instance(instance_id).await?;
        let task = self.store.get_task(instance.task_id).await?;
        let handler = match self.registry.get(&task.kind) {
            Ok(handler) => handler,
            Err(e) => {
                error!(instance.id = instance_id, "无法运行任务实例: {}", e);
                self.store
                    .instances
                    .transition(instance_id, InstanceStatus::Error)
                    .await?;
                StructuredLogger::log_instance_finished(instance_id, InstanceStatus::Error, None);
                return Ok(InstanceStatus::Error);
            }
        };

        let instance = self
            .store
            .instances
            .transition(instance_id, InstanceStatus::Running)
            .await?;
        info!(
            instance.id = instance_id,
            task.id = task.id,
            task.kind = %task.kind,
            task.revision = ?instance.revision,
            "任务实例开始运行"
        );

        let timeout = task.timeout();
        let ctx = TaskContext {
            instance,
            task,
            store: self.store.clone(),
        };

        let outcome = tokio::select! {
            result = handler.run(&ctx) => Outcome::Finished(result),
            _ = sleep_or_forever(timeout) => Outcome::TimedOut,
            _ = interrupt => Outcome::Interrupted,
        };

        let status = match outcome {
            Outcome::Finished(Ok(true)) => InstanceStatus::Success,
            Outcome::Finished(Ok(false)) => InstanceStatus::Failure,
            Outcome::Finished(Err(e)) => {
                error!(instance.id = instance_id, "任务运行出错: {}", e);
                InstanceStatus::Failure
            }
            Outcome::TimedOut => InstanceStatus::TimedOut,
            Outcome::Interrupted => InstanceStatus::Interrupted,
        };

        let finished = self.store.instances.transition(instance_id, status).await?;
        if matches!(status, InstanceStatus::TimedOut | InstanceStatus::Interrupted) {
            warn!(instance.id = instance_id, status = %status, "任务未正常结束，执行收尾");
            self.finalize(handler.as_ref(), &ctx, timeout).await;
        }

        StructuredLogger::log_instance_finished(
            instance_id,
            status,
            finished.execution_duration_ms(),
        );

        if status == InstanceStatus::Success {
            let released = advance_dependents(&self.store, &finished).await?;
            if !released.is_empty() {
                info!(
                    instance.id = instance_id,
                    count = released.len(),
                    "已入队后续作业节点"
                );
            }
        }
        Ok(status)
    }

    /// 收尾时限取配置值与任务超时中较短的一个；超时或失败只记录日志
    async fn finalize(&self, handler: &dyn TaskHandler, ctx: &TaskContext, task_timeout: Option<Duration>) {
        let limit = task_timeout
            .map(|t| t.min(self.finalizer_timeout))
            .unwrap_or(self.finalizer_timeout);
        match tokio::time::timeout(limit, handler.finalize(ctx)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(instance.id = ctx.instance.id, "收尾动作失败: {}", e),
            Err(_) => error!(
                instance.id = ctx.instance.id,
                limit_ms = limit.as_millis() as u64,
                "收尾动作超时"
            ),
        }
    }
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

/// 等待 SIGINT 或 SIGTERM
pub async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("安装信号处理失败: {}", e);
                std::future::pending::<()>().await
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await
        }
    }
}
