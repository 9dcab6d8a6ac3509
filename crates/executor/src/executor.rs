use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskfleet_core::{
    Backup, Daemon, DaemonContext, DaemonKind, DaemonStatus, ExecutorConfig, FleetResult,
    Instance, InstanceStatus, LogPaths, Queue, Request, StructuredLogger,
};
use taskfleet_infrastructure::FleetMetrics;
use tokio::process::Child;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::launcher::InstanceLauncher;

/// 执行器运行统计，可在守护进程运行期间从外部读取
#[derive(Debug, Default)]
pub struct ExecutorStats {
    live: AtomicUsize,
    peak: AtomicUsize,
    launched: AtomicUsize,
}

impl ExecutorStats {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// 同时存活子进程数的峰值
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    fn record_launch(&self, live: usize) {
        self.launched.fetch_add(1, Ordering::SeqCst);
        self.set_live(live);
        self.peak.fetch_max(live, Ordering::SeqCst);
    }

    fn set_live(&self, live: usize) {
        self.live.store(live, Ordering::SeqCst);
    }
}

/// 执行器守护进程
///
/// 每个轮询周期：处理控制请求，回收已退出的子进程，转发实例上的 KILL 请求，
/// RUNNING 时在并发上限内弹出实例并为每个实例启动一个子进程。
pub struct Executor {
    config: ExecutorConfig,
    launcher: Arc<dyn InstanceLauncher>,
    backup: Option<Arc<dyn Backup>>,
    log_paths: LogPaths,
    children: HashMap<i64, Child>,
    backups: JoinSet<()>,
    stats: Arc<ExecutorStats>,
    metrics: FleetMetrics,
}

impl Executor {
    pub fn new(config: ExecutorConfig, launcher: Arc<dyn InstanceLauncher>) -> Self {
        let log_paths = LogPaths::new(&config.log_dir);
        Self {
            config,
            launcher,
            backup: None,
            log_paths,
            children: HashMap::new(),
            backups: JoinSet::new(),
            stats: Arc::new(ExecutorStats::default()),
            metrics: FleetMetrics::new(),
        }
    }

    /// 实例结束后把其日志交给备份协作者
    pub fn with_backup(mut self, backup: Arc<dyn Backup>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn stats(&self) -> Arc<ExecutorStats> {
        self.stats.clone()
    }

    /// 处理一个请求，返回主循环是否应当结束
    async fn handle_request(&mut self, ctx: &DaemonContext, request: Request) -> FleetResult<bool> {
        let status = ctx.status().await;
        let done = match request {
            Request::Pause => {
                if status == DaemonStatus::Running {
                    ctx.set_status(DaemonStatus::Paused).await?;
                }
                false
            }
            Request::Resume => {
                if matches!(status, DaemonStatus::Paused | DaemonStatus::Suspended) {
                    ctx.set_status(DaemonStatus::Running).await?;
                }
                false
            }
            Request::Stop => {
                // 不再弹出新实例，等待现有子进程结束
                ctx.set_status(DaemonStatus::Stopping).await?;
                false
            }
            Request::Kill => {
                self.terminate_all();
                ctx.set_status(DaemonStatus::Killed).await?;
                true
            }
            Request::Reload => {
                warn!(daemon.id = ctx.id(), "执行器不支持 RELOAD 请求");
                false
            }
        };
        StructuredLogger::log_request_handled(ctx.id(), request, ctx.status().await);
        Ok(done)
    }

    /// 在并发上限内弹出并启动实例，返回本轮启动的数量
    async fn launch_available(&mut self, ctx: &DaemonContext, queue: &dyn Queue) -> FleetResult<usize> {
        let mut launched = 0;
        while self.children.len() < self.config.concurrent {
            let Some(instance) = queue.pop().await? else {
                break;
            };
            if self.launch(ctx, instance).await? {
                launched += 1;
            }
        }
        Ok(launched)
    }

    async fn launch(&mut self, ctx: &DaemonContext, instance: Instance) -> FleetResult<bool> {
        let store = ctx.store();
        store.instances.set_executor(instance.id, ctx.id()).await?;

        let child = match self.launcher.launch(&instance) {
            Ok(child) => child,
            Err(e) => {
                error!(instance.id = instance.id, "启动任务实例失败: {}", e);
                store
                    .instances
                    .transition(instance.id, InstanceStatus::Error)
                    .await?;
                self.metrics.record_finished(InstanceStatus::Error);
                return Ok(false);
            }
        };

        StructuredLogger::log_instance_started(instance.id, instance.task_id, ctx.id(), child.id());
        self.children.insert(instance.id, child);
        self.stats.record_launch(self.children.len());
        self.metrics.set_live_subprocesses(self.children.len());
        Ok(true)
    }

    /// 回收已退出的子进程
    async fn reap(&mut self, ctx: &DaemonContext) -> FleetResult<()> {
        let mut exited = Vec::new();
        for (id, child) in self.children.iter_mut() {
            match child.try_wait() {
                Ok(Some(exit)) => exited.push((*id, exit)),
                Ok(None) => {}
                Err(e) => error!(instance.id = *id, "查询子进程状态失败: {}", e),
            }
        }

        for (id, exit) in exited {
            self.children.remove(&id);
            self.settle(ctx, id, Some(exit)).await?;
        }
        while self.backups.try_join_next().is_some() {}
        Ok(())
    }

    /// 子进程退出后以存储中的状态为准；子进程没能写入终态时由执行器补记
    async fn settle(&mut self, ctx: &DaemonContext, id: i64, exit: Option<ExitStatus>) -> FleetResult<()> {
        self.stats.set_live(self.children.len());
        self.metrics.set_live_subprocesses(self.children.len());

        let store = ctx.store();
        let instance = store.get_instance(id).await?;
        let status = match instance.status {
            InstanceStatus::Created => {
                // 子进程没来得及更新状态就退出，实例与执行器都挂起等待人工处理
                error!(instance.id = id, exit = ?exit, "子进程在实例开始运行前退出");
                self.force_status(ctx, id, InstanceStatus::Suspended).await;
                if matches!(ctx.status().await, DaemonStatus::Running | DaemonStatus::Paused) {
                    ctx.set_status(DaemonStatus::Suspended).await?;
                }
                InstanceStatus::Suspended
            }
            InstanceStatus::Running => {
                error!(instance.id = id, exit = ?exit, "子进程退出时实例仍在运行");
                self.force_status(ctx, id, InstanceStatus::Error).await;
                InstanceStatus::Error
            }
            status => status,
        };

        let duration = store
            .instances
            .get_by_id(id)
            .await?
            .and_then(|i| i.execution_duration_ms());
        StructuredLogger::log_instance_finished(id, status, duration);
        self.metrics.record_finished(status);
        self.schedule_backup(id);
        Ok(())
    }

    async fn force_status(&self, ctx: &DaemonContext, id: i64, status: InstanceStatus) {
        if let Err(e) = ctx.store().instances.transition(id, status).await {
            error!(instance.id = id, status = %status, "补记实例状态失败: {}", e);
        }
    }

    fn schedule_backup(&mut self, id: i64) {
        let Some(backup) = self.backup.clone() else {
            return;
        };
        let path = self.log_paths.instance_log(id);
        self.backups.spawn(async move {
            if backup.backup(&path).await {
                debug!(instance.id = id, "实例日志已备份");
            } else {
                warn!(instance.id = id, log = %path.display(), "实例日志备份失败");
            }
        });
    }

    /// 终止收到 KILL 请求的实例子进程
    async fn honor_instance_kills(&mut self, ctx: &DaemonContext) -> FleetResult<()> {
        let store = ctx.store();
        let ids: Vec<i64> = self.children.keys().copied().collect();
        for id in ids {
            let Some(instance) = store.instances.get_by_id(id).await? else {
                continue;
            };
            if instance.request != Some(Request::Kill) {
                continue;
            }
            info!(instance.id = id, "按请求终止任务实例");
            if let Some(child) = self.children.get_mut(&id) {
                terminate(id, child);
            }
            store.instances.clear_request(id, Request::Kill).await?;
        }
        Ok(())
    }

    fn terminate_all(&mut self) {
        for (id, child) in self.children.iter_mut() {
            terminate(*id, child);
        }
    }
}

/// 向子进程发送 SIGTERM，由实例进程自行记录 INTERRUPTED 并收尾
fn terminate(id: i64, child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => debug!(instance.id = id, process.pid = pid, "已发送 SIGTERM"),
                Err(e) => warn!(instance.id = id, process.pid = pid, "发送 SIGTERM 失败: {}", e),
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = child.start_kill() {
            warn!(instance.id = id, "终止子进程失败: {}", e);
        }
    }
}

#[async_trait]
impl Daemon for Executor {
    fn kind(&self) -> DaemonKind {
        DaemonKind::Executor
    }

    async fn run(&mut self, ctx: &DaemonContext) -> FleetResult<()> {
        let queue = ctx.store().queues.resolve(&self.config.queue).await?;
        info!(
            daemon.id = ctx.id(),
            queue = %self.config.queue,
            concurrent = self.config.concurrent,
            "执行器开始处理队列"
        );

        loop {
            if let Some(request) = ctx.pending_request().await? {
                let done = self.handle_request(ctx, request).await?;
                ctx.clear_request(request).await?;
                if done {
                    break;
                }
            }

            self.reap(ctx).await?;
            self.honor_instance_kills(ctx).await?;

            match ctx.status().await {
                DaemonStatus::Running => {
                    self.launch_available(ctx, queue.as_ref()).await?;
                }
                DaemonStatus::Stopping if self.children.is_empty() => {
                    ctx.set_status(DaemonStatus::Ended).await?;
                    break;
                }
                _ => {}
            }

            ctx.wait_poll_period().await;
        }
        Ok(())
    }

    async fn clean_up(&mut self, ctx: &DaemonContext) -> FleetResult<()> {
        // 主循环异常结束时子进程可能仍在运行
        self.terminate_all();

        let grace = Duration::from_secs(self.config.kill_grace_seconds);
        let children: Vec<(i64, Child)> = self.children.drain().collect();
        for (id, mut child) in children {
            let exit = match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(exit)) => Some(exit),
                Ok(Err(e)) => {
                    error!(instance.id = id, "等待子进程退出失败: {}", e);
                    None
                }
                Err(_) => {
                    warn!(instance.id = id, "子进程未在宽限期内退出，强制结束");
                    if let Err(e) = child.start_kill() {
                        error!(instance.id = id, "强制结束子进程失败: {}", e);
                    }
                    child.wait().await.ok()
                }
            };
            self.settle(ctx, id, exit).await?;
        }

        while let Some(joined) = self.backups.join_next().await {
            if let Err(e) = joined {
                error!(daemon.id = ctx.id(), "日志备份任务异常退出: {}", e);
            }
        }
        info!(
            daemon.id = ctx.id(),
            launched = self.stats.launched(),
            peak = self.stats.peak(),
            "执行器已清理"
        );
        Ok(())
    }
}
