use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::errors::{FleetError, FleetResult};
use crate::models::{Instance, Task};
use crate::queue_registry::QueueRegistry;
use crate::traits::{
    DaemonRepository, InstanceRepository, JobRepository, ScheduleRepository, TaskRepository,
};

/// 共享存储的全部仓储，守护进程与任务处理器通过它访问数据
#[derive(Clone)]
pub struct Store {
    pub daemons: Arc<dyn DaemonRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub instances: Arc<dyn InstanceRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub queues: Arc<QueueRegistry>,
}

impl Store {
    pub async fn get_task(&self, id: i64) -> FleetResult<Task> {
        self.tasks
            .get_by_id(id)
            .await?
            .ok_or(FleetError::TaskNotFound { id })
    }

    pub async fn get_instance(&self, id: i64) -> FleetResult<Instance> {
        self.instances
            .get_by_id(id)
            .await?
            .ok_or(FleetError::InstanceNotFound { id })
    }

    /// 将已持久化的实例推入指定队列并记录入队时间
    pub async fn enqueue(&self, instance: &Instance, queue_name: &str) -> FleetResult<Instance> {
        let queue = self.queues.resolve(queue_name).await?;
        queue.push(instance).await?;
        let now = Utc::now();
        self.instances.set_enqueued(instance.id, now).await?;
        debug!(
            instance.id = instance.id,
            queue = queue_name,
            "任务实例已入队"
        );
        let mut enqueued = instance.clone();
        enqueued.enqueued = Some(now);
        Ok(enqueued)
    }

    /// 不经过调度直接为任务创建实例并入队
    pub async fn enqueue_task(&self, task: &Task, queue_name: &str) -> FleetResult<Instance> {
        let instance = self.instances.create(&Instance::new(task)).await?;
        self.enqueue(&instance, queue_name).await
    }
}
