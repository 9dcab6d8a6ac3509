use thiserror::Error;

use crate::models::{DaemonStatus, InstanceStatus, Request};

/// 调度集群错误类型定义
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("守护进程未找到: {id}")]
    DaemonNotFound { id: i64 },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("任务实例未找到: {id}")]
    InstanceNotFound { id: i64 },

    #[error("调度未找到: {key}")]
    ScheduleNotFound { key: String },

    #[error("队列未找到: {name}")]
    QueueNotFound { name: String },

    #[error("未注册的队列类型: {kind}")]
    UnknownQueueKind { kind: String },

    #[error("未注册的任务类型: {kind}")]
    UnknownTaskKind { kind: String },

    #[error("无效的CRON编码: {encoding} - {message}")]
    MalformedCron { encoding: String, message: String },

    #[error("无效的调度参数: {0}")]
    InvalidSchedule(String),

    #[error("调度状态错误: {0}")]
    ScheduleState(String),

    #[error("无效的队列元素: {0}")]
    InvalidItem(String),

    #[error("队列不支持该操作: {0}")]
    NotImplemented(String),

    #[error("无效的任务实例状态迁移: {from} -> {to}")]
    InvalidTransition {
        from: InstanceStatus,
        to: InstanceStatus,
    },

    #[error("守护进程状态不允许该操作: {status}")]
    InvalidDaemonState { status: DaemonStatus },

    #[error("守护进程不接受该请求: {request}")]
    InvalidRequest { request: Request },

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("进程控制错误: {0}")]
    Process(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type FleetResult<T> = std::result::Result<T, FleetError>;
