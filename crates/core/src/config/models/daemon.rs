use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 所有守护进程共享的生命周期参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub heartbeat_interval_seconds: u64,
    /// 心跳超过该时长未更新即视为失去存活
    pub heartbeat_failure_seconds: u64,
    pub poll_interval_ms: u64,
    /// SIGINT 映射为 STOP 请求，SIGTERM 映射为 KILL 请求
    pub handle_signals: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 3,
            heartbeat_failure_seconds: 12,
            poll_interval_ms: 1000,
            handle_signals: true,
        }
    }
}

impl DaemonConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn failure_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_failure_seconds as i64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.heartbeat_failure_seconds <= self.heartbeat_interval_seconds {
            return Err(anyhow::anyhow!(
                "心跳失效窗口({}秒)必须大于心跳间隔({}秒)",
                self.heartbeat_failure_seconds,
                self.heartbeat_interval_seconds
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 每次轮询最多认领的调度数
    pub max_claim_batch: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_claim_batch: 500,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_claim_batch <= 0 {
            return Err(anyhow::anyhow!("单次认领数量必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub queue: String,
    pub concurrent: usize,
    pub log_dir: String,
    /// 设置后，结束的任务实例日志会复制到该目录
    pub backup_dir: Option<String>,
    pub job_poll_interval_ms: u64,
    pub finalizer_timeout_seconds: u64,
    /// KILL 之后等待子进程退出的时长
    pub kill_grace_seconds: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            queue: "default".to_string(),
            concurrent: 4,
            log_dir: "logs".to_string(),
            backup_dir: None,
            job_poll_interval_ms: 1000,
            finalizer_timeout_seconds: 10,
            kill_grace_seconds: 5,
        }
    }
}

impl ExecutorConfig {
    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }

    pub fn finalizer_timeout(&self) -> Duration {
        Duration::from_secs(self.finalizer_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue.is_empty() {
            return Err(anyhow::anyhow!("执行器队列名不能为空"));
        }

        if self.concurrent == 0 {
            return Err(anyhow::anyhow!("最大并发数必须大于0"));
        }

        if self.log_dir.is_empty() {
            return Err(anyhow::anyhow!("日志目录不能为空"));
        }

        if matches!(&self.backup_dir, Some(dir) if dir.is_empty()) {
            return Err(anyhow::anyhow!("备份目录不能为空字符串"));
        }

        if self.job_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("作业轮询间隔必须大于0"));
        }

        if self.finalizer_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("收尾超时时间必须大于0"));
        }

        Ok(())
    }
}
