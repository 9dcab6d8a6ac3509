use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use taskfleet_core::{
    AppConfig, Daemon, DaemonKind, DaemonRecord, DaemonRuntime, DaemonStatus, InstanceStatus,
    LogPaths,
};
use taskfleet_executor::{builtin_registry, Executor, InstanceRunner, ProcessLauncher};
use taskfleet_infrastructure::{DatabaseManager, LocalBackup};
use taskfleet_scheduler::Scheduler;
use tracing::{error, info};

use crate::common::{init_logging, start_metrics};

/// 应用运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 调度器守护进程
    Scheduler,
    /// 执行器守护进程
    Executor,
    /// 执行器启动的单实例子进程
    RunInstance { instance_id: i64 },
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    config_path: Option<String>,
    database: DatabaseManager,
}

impl Application {
    /// 连接数据库并确保表结构就绪
    pub async fn new(config: AppConfig, config_path: Option<String>) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("初始化数据库表结构失败")?;
        Ok(Self {
            config,
            config_path,
            database,
        })
    }

    pub async fn run(self, mode: AppMode) -> Result<()> {
        match mode {
            AppMode::Scheduler => {
                let scheduler = Scheduler::new(self.config.scheduler.clone());
                self.run_daemon(DaemonRecord::new(DaemonKind::Scheduler), scheduler)
                    .await
            }
            AppMode::Executor => {
                let executor = self.build_executor()?;
                let record = DaemonRecord::executor(
                    &self.config.executor.queue,
                    self.config.executor.concurrent as i64,
                );
                self.run_daemon(record, executor).await
            }
            AppMode::RunInstance { instance_id } => self.run_instance(instance_id).await,
        }
    }

    /// 注册并运行守护进程直到其进入终态
    async fn run_daemon<D: Daemon>(self, record: DaemonRecord, daemon: D) -> Result<()> {
        let kind = record.kind;
        let mut runtime = DaemonRuntime::register(
            self.database.store(),
            self.config.daemon.clone(),
            record,
            daemon,
        )
        .await
        .context("注册守护进程失败")?;

        let log_paths = LogPaths::new(&self.config.executor.log_dir);
        init_logging(
            &self.config.logging,
            Some(&log_paths.daemon_log(kind, runtime.id())),
        )?;
        start_metrics(&self.config.observability)?;
        info!(daemon.id = runtime.id(), daemon.kind = %kind, "守护进程已注册");

        let started = runtime.start().await;
        let status = runtime.context().status().await;
        self.database.close().await;

        if !started.context("守护进程运行失败")? {
            return Err(anyhow!("已有存活的 {} 守护进程，拒绝启动", kind));
        }
        if status == DaemonStatus::Error {
            return Err(anyhow!("守护进程以 ERROR 状态结束"));
        }
        Ok(())
    }

    fn build_executor(&self) -> Result<Executor> {
        let log_paths = LogPaths::new(&self.config.executor.log_dir);
        let mut args = Vec::new();
        if let Some(path) = &self.config_path {
            args.push("--config".to_string());
            args.push(path.clone());
        }
        args.push("--log-level".to_string());
        args.push(self.config.logging.level.clone());
        args.push("--log-format".to_string());
        args.push(self.config.logging.format.clone());

        let launcher = ProcessLauncher::current_exe(log_paths)
            .context("无法定位当前可执行文件")?
            .with_args(args);
        let mut executor = Executor::new(self.config.executor.clone(), Arc::new(launcher));
        if let Some(dir) = &self.config.executor.backup_dir {
            executor = executor.with_backup(Arc::new(LocalBackup::new(dir)));
        }
        Ok(executor)
    }

    /// 子进程的输出已由执行器重定向到实例日志
    async fn run_instance(self, instance_id: i64) -> Result<()> {
        init_logging(&self.config.logging, None)?;
        let runner = InstanceRunner::new(
            self.database.store(),
            builtin_registry(&self.config.executor),
            self.config.executor.finalizer_timeout(),
        );
        let result = runner.run(instance_id).await;
        self.database.close().await;

        let status = result.with_context(|| format!("运行任务实例 {instance_id} 失败"))?;
        if status == InstanceStatus::Error {
            error!(instance.id = instance_id, "任务实例无法运行");
        }
        Ok(())
    }
}
