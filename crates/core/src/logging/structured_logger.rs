//! Structured logging of lifecycle events
//!
//! Each event carries an `event` field so that log pipelines can filter
//! on it without parsing messages.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::models::{DaemonKind, DaemonStatus, InstanceStatus, Request, ScheduleKey};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_daemon_started(kind: DaemonKind, daemon_id: i64, host: &str, pid: i64) {
        info!(
            event = "daemon_started",
            daemon.kind = %kind,
            daemon.id = daemon_id,
            daemon.host = host,
            daemon.pid = pid,
            "守护进程已启动"
        );
    }

    pub fn log_daemon_ended(kind: DaemonKind, daemon_id: i64, status: DaemonStatus) {
        if status == DaemonStatus::Error {
            error!(
                event = "daemon_ended",
                daemon.kind = %kind,
                daemon.id = daemon_id,
                daemon.status = %status,
                "守护进程异常结束"
            );
        } else {
            info!(
                event = "daemon_ended",
                daemon.kind = %kind,
                daemon.id = daemon_id,
                daemon.status = %status,
                "守护进程已结束"
            );
        }
    }

    pub fn log_request_handled(daemon_id: i64, request: Request, status: DaemonStatus) {
        info!(
            event = "request_handled",
            daemon.id = daemon_id,
            request = %request,
            daemon.status = %status,
            "已处理控制请求"
        );
    }

    pub fn log_schedule_claimed(key: ScheduleKey, scheduler_id: i64, next: DateTime<Utc>) {
        info!(
            event = "schedule_claimed",
            schedule.key = %key,
            scheduler.id = scheduler_id,
            schedule.next = %next,
            "调度已认领"
        );
    }

    pub fn log_schedule_released(key: ScheduleKey, scheduler_id: i64, reason: &str) {
        info!(
            event = "schedule_released",
            schedule.key = %key,
            scheduler.id = scheduler_id,
            reason = reason,
            "调度已释放"
        );
    }

    pub fn log_instance_enqueued(instance_id: i64, task_id: i64, queue: &str) {
        info!(
            event = "instance_enqueued",
            instance.id = instance_id,
            task.id = task_id,
            queue = queue,
            "任务实例已入队"
        );
    }

    pub fn log_instance_started(instance_id: i64, task_id: i64, executor_id: i64, pid: Option<u32>) {
        info!(
            event = "instance_started",
            instance.id = instance_id,
            task.id = task_id,
            executor.id = executor_id,
            process.pid = pid,
            "任务实例子进程已启动"
        );
    }

    pub fn log_instance_finished(instance_id: i64, status: InstanceStatus, duration_ms: Option<i64>) {
        if status == InstanceStatus::Success {
            info!(
                event = "instance_finished",
                instance.id = instance_id,
                instance.status = %status,
                instance.duration_ms = duration_ms,
                "任务实例执行成功"
            );
        } else {
            warn!(
                event = "instance_finished",
                instance.id = instance_id,
                instance.status = %status,
                instance.duration_ms = duration_ms,
                "任务实例未成功结束"
            );
        }
    }
}
