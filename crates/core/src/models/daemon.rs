use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 守护进程类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DaemonKind {
    #[serde(rename = "SCHEDULER")]
    Scheduler,
    #[serde(rename = "EXECUTOR")]
    Executor,
}

sqlite_text_enum!(DaemonKind {
    Scheduler => "SCHEDULER",
    Executor => "EXECUTOR",
});

impl DaemonKind {
    /// 该类型守护进程接受的请求集合
    pub fn valid_requests(&self) -> &'static [Request] {
        match self {
            DaemonKind::Scheduler => &[
                Request::Stop,
                Request::Kill,
                Request::Pause,
                Request::Resume,
                Request::Reload,
            ],
            DaemonKind::Executor => &[
                Request::Stop,
                Request::Kill,
                Request::Pause,
                Request::Resume,
            ],
        }
    }

    pub fn accepts(&self, request: Request) -> bool {
        self.valid_requests().contains(&request)
    }

    /// 日志目录与文件名使用的实体名
    pub fn entity_name(&self) -> &'static str {
        match self {
            DaemonKind::Scheduler => "scheduler",
            DaemonKind::Executor => "executor",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DaemonStatus {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "STOPPING")]
    Stopping,
    #[serde(rename = "SUSPENDED")]
    Suspended,
    #[serde(rename = "ENDED")]
    Ended,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "KILLED")]
    Killed,
    #[serde(rename = "HANDLED")]
    Handled,
}

sqlite_text_enum!(DaemonStatus {
    Created => "CREATED",
    Running => "RUNNING",
    Paused => "PAUSED",
    Stopping => "STOPPING",
    Suspended => "SUSPENDED",
    Ended => "ENDED",
    Error => "ERROR",
    Killed => "KILLED",
    Handled => "HANDLED",
});

impl DaemonStatus {
    pub const FINAL: [DaemonStatus; 4] = [
        DaemonStatus::Ended,
        DaemonStatus::Error,
        DaemonStatus::Killed,
        DaemonStatus::Handled,
    ];

    pub fn is_final(&self) -> bool {
        Self::FINAL.contains(self)
    }
}

/// 写入守护进程或任务实例记录上的控制请求
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Request {
    #[serde(rename = "STOP")]
    Stop,
    #[serde(rename = "KILL")]
    Kill,
    #[serde(rename = "PAUSE")]
    Pause,
    #[serde(rename = "RESUME")]
    Resume,
    #[serde(rename = "RELOAD")]
    Reload,
}

sqlite_text_enum!(Request {
    Stop => "STOP",
    Kill => "KILL",
    Pause => "PAUSE",
    Resume => "RESUME",
    Reload => "RELOAD",
});

/// 守护进程记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRecord {
    pub id: i64,
    pub kind: DaemonKind,
    pub host: String,
    pub pid: i64,
    pub status: DaemonStatus,
    pub request: Option<Request>,
    pub heartbeat: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    /// 仅 Executor 使用
    pub queue: Option<String>,
    /// 仅 Executor 使用
    pub concurrent: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl DaemonRecord {
    pub fn new(kind: DaemonKind) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            id: 0, // 将由数据库生成
            kind,
            host,
            pid: std::process::id() as i64,
            status: DaemonStatus::Created,
            request: None,
            heartbeat: None,
            started: None,
            ended: None,
            queue: None,
            concurrent: None,
            created_at: Utc::now(),
        }
    }

    pub fn executor(queue: impl Into<String>, concurrent: i64) -> Self {
        let mut record = Self::new(DaemonKind::Executor);
        record.queue = Some(queue.into());
        record.concurrent = Some(concurrent);
        record
    }

    /// 存活判定：非终态且心跳在失效窗口之内
    pub fn is_alive(&self, now: DateTime<Utc>, failure_window: Duration) -> bool {
        if self.status.is_final() {
            return false;
        }
        match self.heartbeat {
            Some(heartbeat) => now - heartbeat <= failure_window,
            None => false,
        }
    }

    /// 请求是否会被该守护进程接受
    pub fn accepts(&self, request: Request) -> bool {
        !self.status.is_final() && self.kind.accepts(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_liveness() {
        let now = Utc::now();
        let window = Duration::seconds(12);
        let mut record = DaemonRecord::new(DaemonKind::Scheduler);
        assert!(!record.is_alive(now, window));

        record.status = DaemonStatus::Running;
        record.heartbeat = Some(now - Duration::seconds(3));
        assert!(record.is_alive(now, window));

        record.heartbeat = Some(now - Duration::seconds(30));
        assert!(!record.is_alive(now, window));

        record.heartbeat = Some(now);
        record.status = DaemonStatus::Ended;
        assert!(!record.is_alive(now, window));
    }

    #[test]
    fn test_valid_requests_by_kind() {
        assert!(DaemonKind::Scheduler.accepts(Request::Reload));
        assert!(!DaemonKind::Executor.accepts(Request::Reload));
        assert!(DaemonKind::Executor.accepts(Request::Kill));

        let mut record = DaemonRecord::executor("default", 2);
        record.status = DaemonStatus::Killed;
        assert!(!record.accepts(Request::Stop));
    }

    #[test]
    fn test_status_text_round_trip() {
        for status in [
            DaemonStatus::Created,
            DaemonStatus::Suspended,
            DaemonStatus::Handled,
        ] {
            assert_eq!(status.as_str().parse::<DaemonStatus>().unwrap(), status);
        }
        assert!("BOGUS".parse::<Request>().is_err());
    }
}
