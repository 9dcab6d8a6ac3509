use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Request, ScheduleKey, Task};

/// 任务实例状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum InstanceStatus {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "TIMEDOUT")]
    TimedOut,
    #[serde(rename = "INTERRUPTED")]
    Interrupted,
    #[serde(rename = "SUSPENDED")]
    Suspended,
    #[serde(rename = "HANDLED")]
    Handled,
}

sqlite_text_enum!(InstanceStatus {
    Created => "CREATED",
    Running => "RUNNING",
    Success => "SUCCESS",
    Failure => "FAILURE",
    Error => "ERROR",
    TimedOut => "TIMEDOUT",
    Interrupted => "INTERRUPTED",
    Suspended => "SUSPENDED",
    Handled => "HANDLED",
});

impl InstanceStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, InstanceStatus::Created | InstanceStatus::Running)
    }

    /// 需要人工确认（handle）的失败状态
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Failure
                | InstanceStatus::Error
                | InstanceStatus::TimedOut
                | InstanceStatus::Interrupted
                | InstanceStatus::Suspended
        )
    }

    /// 状态机只允许单调前进
    pub fn can_transition_to(&self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        match self {
            Created => matches!(next, Running | Error | Suspended),
            Running => matches!(next, Success | Failure | Error | TimedOut | Interrupted),
            s if s.is_failure() => next == Handled,
            _ => false,
        }
    }
}

/// 任务的一次执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: i64,
    pub task_id: i64,
    pub status: InstanceStatus,
    pub request: Option<Request>,
    /// 创建该实例时任务的修订版本
    pub revision: Option<String>,
    pub executor_id: Option<i64>,
    pub schedule: Option<ScheduleKey>,
    pub job_instance_id: Option<i64>,
    pub job_node_id: Option<i64>,
    pub enqueued: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Instance {
    pub fn new(task: &Task) -> Self {
        Self {
            id: 0, // 将由数据库生成
            task_id: task.id,
            status: InstanceStatus::Created,
            request: None,
            revision: task.revision.clone(),
            executor_id: None,
            schedule: None,
            job_instance_id: None,
            job_node_id: None,
            enqueued: None,
            started: None,
            ended: None,
            created_at: Utc::now(),
        }
    }

    /// 由调度触发创建的实例
    pub fn for_schedule(task: &Task, key: ScheduleKey) -> Self {
        let mut instance = Self::new(task);
        instance.schedule = Some(key);
        instance
    }

    /// 作业图中某个节点的实例
    pub fn for_job_node(task: &Task, job_instance_id: i64, job_node_id: i64) -> Self {
        let mut instance = Self::new(task);
        instance.job_instance_id = Some(job_instance_id);
        instance.job_node_id = Some(job_node_id);
        instance
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_final()
    }

    /// 实例只接受 KILL，且必须尚未结束
    pub fn accepts(&self, request: Request) -> bool {
        request == Request::Kill && !self.status.is_final()
    }

    pub fn execution_duration_ms(&self) -> Option<i64> {
        if let (Some(started), Some(ended)) = (self.started, self.ended) {
            Some((ended - started).num_milliseconds())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InstanceStatus::*;

    const ALL: [InstanceStatus; 9] = [
        Created,
        Running,
        Success,
        Failure,
        Error,
        TimedOut,
        Interrupted,
        Suspended,
        Handled,
    ];

    #[test]
    fn test_transitions_are_monotonic() {
        for from in ALL {
            for to in ALL {
                if !from.can_transition_to(to) {
                    continue;
                }
                // 不允许回到非终态
                assert!(to != Created, "{from} -> {to}");
                if from.is_final() {
                    assert_eq!(to, Handled, "{from} -> {to}");
                }
            }
        }
    }

    #[test]
    fn test_handled_only_from_failures() {
        for from in ALL {
            assert_eq!(from.can_transition_to(Handled), from.is_failure(), "{from}");
        }
        assert!(!Success.can_transition_to(Handled));
        assert!(!Handled.can_transition_to(Handled));
    }

    #[test]
    fn test_running_reaches_every_final_state() {
        for to in [Success, Failure, Error, TimedOut, Interrupted] {
            assert!(Running.can_transition_to(to));
            assert!(to.is_final());
        }
        assert!(!Running.can_transition_to(Created));
        assert!(!Running.can_transition_to(Suspended));
    }
}
