//! 数据仓储层接口定义
//!
//! 共享存储是集群中唯一的共享可变资源。每个接口只负责一类记录：
//! - `DaemonRepository` - 守护进程注册、心跳、控制请求
//! - `TaskRepository` - 任务定义
//! - `InstanceRepository` - 任务实例及其状态机
//! - `ScheduleRepository` - 固定周期与 CRON 调度的认领和推进
//! - `JobRepository` - 作业图的节点与依赖边
//! - `QueueRepository` - 队列定义
//!
//! ## 并发写入
//!
//! 不能覆盖并发写入的字段（控制请求、认领归属、实例状态）一律通过单条
//! 带条件的 `UPDATE ... WHERE` 完成，返回值表示条件是否成立。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::errors::FleetResult;
use crate::models::{
    CronSchedule, DaemonKind, DaemonRecord, DaemonStatus, Dependency, Instance, InstanceStatus,
    JobNode, QueueRecord, Request, Schedule, ScheduleKey, ScheduleRecord, Task,
};

#[async_trait]
pub trait DaemonRepository: Send + Sync {
    async fn create(&self, daemon: &DaemonRecord) -> FleetResult<DaemonRecord>;

    async fn get_by_id(&self, id: i64) -> FleetResult<Option<DaemonRecord>>;

    async fn update_status(&self, id: i64, status: DaemonStatus) -> FleetResult<()>;

    /// 记录启动时间与首次心跳
    async fn mark_started(&self, id: i64, at: DateTime<Utc>) -> FleetResult<()>;

    async fn mark_ended(&self, id: i64, at: DateTime<Utc>) -> FleetResult<()>;

    /// 只在非终态时推进心跳，返回是否写入
    async fn heartbeat(&self, id: i64, at: DateTime<Utc>) -> FleetResult<bool>;

    /// 写入控制请求；目标已处于终态或不接受该请求时返回 false
    async fn make_request(&self, id: i64, request: Request) -> FleetResult<bool>;

    /// 仅当字段仍等于已读取的请求时清除，返回是否清除
    async fn clear_request(&self, id: i64, seen: Request) -> FleetResult<bool>;

    /// 某类存活的守护进程
    async fn list_alive(
        &self,
        kind: DaemonKind,
        now: DateTime<Utc>,
        failure_window: Duration,
    ) -> FleetResult<Vec<DaemonRecord>>;

    /// 将已失去存活的守护进程标记为 HANDLED，不改动请求字段
    async fn handle(
        &self,
        id: i64,
        now: DateTime<Utc>,
        failure_window: Duration,
    ) -> FleetResult<bool>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> FleetResult<Task>;

    async fn get_by_id(&self, id: i64) -> FleetResult<Option<Task>>;

    /// 更新修订版本，之后创建的实例记录新版本
    async fn set_revision(&self, id: i64, revision: Option<&str>) -> FleetResult<()>;
}

#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn create(&self, instance: &Instance) -> FleetResult<Instance>;

    /// 为作业节点创建实例；同一作业实例中该节点已有实例时返回 None
    async fn create_for_job_node(&self, instance: &Instance) -> FleetResult<Option<Instance>>;

    async fn get_by_id(&self, id: i64) -> FleetResult<Option<Instance>>;

    /// 按状态机迁移状态，失败时返回 `InvalidTransition`
    async fn transition(&self, id: i64, status: InstanceStatus) -> FleetResult<Instance>;

    async fn set_enqueued(&self, id: i64, at: DateTime<Utc>) -> FleetResult<()>;

    async fn set_executor(&self, id: i64, executor_id: i64) -> FleetResult<()>;

    /// 写入控制请求；实例已处于终态时返回 false
    async fn make_request(&self, id: i64, request: Request) -> FleetResult<bool>;

    async fn clear_request(&self, id: i64, seen: Request) -> FleetResult<bool>;

    /// 将失败状态的实例标记为 HANDLED
    async fn handle(&self, id: i64) -> FleetResult<bool>;

    async fn list_for_job(&self, job_instance_id: i64) -> FleetResult<Vec<Instance>>;

    async fn list_for_schedule(&self, key: ScheduleKey) -> FleetResult<Vec<Instance>>;
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn create_interval(&self, schedule: &Schedule) -> FleetResult<Schedule>;

    async fn create_cron(&self, schedule: &CronSchedule) -> FleetResult<CronSchedule>;

    async fn get(&self, key: ScheduleKey) -> FleetResult<Option<ScheduleRecord>>;

    /// 未删除、未完成、且无主或归属调度器已失去存活的调度
    async fn list_claimable(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        failure_window: Duration,
    ) -> FleetResult<Vec<ScheduleRecord>>;

    /// 仅当归属仍为 `expected` 时改为 `scheduler_id`
    async fn claim(
        &self,
        key: ScheduleKey,
        expected: Option<i64>,
        scheduler_id: i64,
    ) -> FleetResult<bool>;

    /// 仅当归属为 `scheduler_id` 时清除
    async fn release(&self, key: ScheduleKey, scheduler_id: i64) -> FleetResult<bool>;

    async fn release_all(&self, scheduler_id: i64) -> FleetResult<u64>;

    /// 保存触发后推进的 remaining / next / base
    async fn save_progress(&self, record: &ScheduleRecord) -> FleetResult<()>;

    async fn list_changed(&self, scheduler_id: i64) -> FleetResult<Vec<ScheduleRecord>>;

    async fn set_changed(&self, key: ScheduleKey, changed: bool) -> FleetResult<()>;

    /// 软删除：只打标记，不删除记录
    async fn soft_delete(&self, key: ScheduleKey) -> FleetResult<()>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn add_node(&self, job_task_id: i64, task_id: i64) -> FleetResult<JobNode>;

    async fn add_dependency(&self, parent: &JobNode, child: &JobNode) -> FleetResult<Dependency>;

    async fn get_node(&self, id: i64) -> FleetResult<Option<JobNode>>;

    async fn list_nodes(&self, job_task_id: i64) -> FleetResult<Vec<JobNode>>;

    async fn list_dependencies(&self, job_task_id: i64) -> FleetResult<Vec<Dependency>>;
}

#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn create(&self, queue: &QueueRecord) -> FleetResult<QueueRecord>;

    async fn get_by_name(&self, name: &str) -> FleetResult<Option<QueueRecord>>;
}
