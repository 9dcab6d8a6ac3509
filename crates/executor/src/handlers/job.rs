use std::time::Duration;

use async_trait::async_trait;
use taskfleet_core::{
    root_nodes, unreachable_nodes, FleetError, FleetResult, Instance, InstanceStatus, JobNode,
    Store, Task, TaskContext, TaskHandler,
};
use tracing::{debug, info, warn};

/// 作业参数里节点实例入队的队列名，缺省为 `default`
const DEFAULT_JOB_QUEUE: &str = "default";

fn job_queue(job_task: &Task) -> &str {
    job_task.string_param("queue").unwrap_or(DEFAULT_JOB_QUEUE)
}

/// 作业：按依赖图把节点任务逐层入队，等待全部节点结束
///
/// 作业实例本身只负责入队根节点并轮询；后续节点由父节点实例成功结束时
/// 通过 [`advance_dependents`] 入队。节点实例在任意执行器上运行，作业实例
/// 运行期间占用它所在执行器的一个并发名额。
#[derive(Debug, Clone)]
pub struct JobHandler {
    poll_interval: Duration,
}

impl JobHandler {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

#[async_trait]
impl TaskHandler for JobHandler {
    fn kind(&self) -> &str {
        "job"
    }

    async fn run(&self, ctx: &TaskContext) -> FleetResult<bool> {
        let store = &ctx.store;
        let job_instance_id = ctx.instance.id;
        let nodes = store.jobs.list_nodes(ctx.task.id).await?;
        if nodes.is_empty() {
            info!(instance.id = job_instance_id, "作业没有节点，直接成功");
            return Ok(true);
        }
        let deps = store.jobs.list_dependencies(ctx.task.id).await?;
        let queue = job_queue(&ctx.task);

        // 环上的节点永远等不到全部父节点成功，入队任何节点之前先拒绝
        let blocked = unreachable_nodes(&nodes, &deps);
        if !blocked.is_empty() {
            return Err(FleetError::InvalidTaskParams(format!(
                "作业任务 {} 的依赖图存在环，节点 {:?} 永远无法启动",
                ctx.task.id, blocked
            )));
        }
        for node in root_nodes(&nodes, &deps) {
            enqueue_node(store, job_instance_id, node, queue).await?;
        }

        loop {
            let instances = store.instances.list_for_job(job_instance_id).await?;
            if let Some(failed) = instances
                .iter()
                .find(|i| i.status.is_final() && i.status != InstanceStatus::Success)
            {
                warn!(
                    instance.id = job_instance_id,
                    node.instance = failed.id,
                    node.status = %failed.status,
                    "作业节点失败，作业随之失败"
                );
                return Ok(false);
            }

            let succeeded = instances
                .iter()
                .filter(|i| i.status == InstanceStatus::Success)
                .count();
            debug!(
                instance.id = job_instance_id,
                succeeded,
                total = nodes.len(),
                "作业进度"
            );
            if succeeded == nodes.len() {
                return Ok(true);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// 为节点创建实例并入队；该节点在本次作业中已有实例时不重复创建
async fn enqueue_node(
    store: &Store,
    job_instance_id: i64,
    node: &JobNode,
    queue: &str,
) -> FleetResult<Option<Instance>> {
    let task = store.get_task(node.task_id).await?;
    let Some(instance) = store
        .instances
        .create_for_job_node(&Instance::for_job_node(&task, job_instance_id, node.id))
        .await?
    else {
        debug!(job.instance = job_instance_id, node.id = node.id, "节点实例已存在");
        return Ok(None);
    };
    let instance = store.enqueue(&instance, queue).await?;
    info!(
        job.instance = job_instance_id,
        node.id = node.id,
        instance.id = instance.id,
        "作业节点已入队"
    );
    Ok(Some(instance))
}

/// 节点实例成功后调用：所有父节点都已成功的子节点入队，返回新入队的实例
pub async fn advance_dependents(store: &Store, finished: &Instance) -> FleetResult<Vec<Instance>> {
    let (Some(job_instance_id), Some(node_id)) = (finished.job_instance_id, finished.job_node_id)
    else {
        return Ok(Vec::new());
    };

    let job_instance = store.get_instance(job_instance_id).await?;
    let job_task = store.get_task(job_instance.task_id).await?;
    let queue = job_queue(&job_task);
    let deps = store.jobs.list_dependencies(job_task.id).await?;
    let instances = store.instances.list_for_job(job_instance_id).await?;

    let succeeded = |node: i64| {
        instances
            .iter()
            .any(|i| i.job_node_id == Some(node) && i.status == InstanceStatus::Success)
    };

    let mut enqueued = Vec::new();
    for child in deps.iter().filter(|d| d.parent_node_id == node_id) {
        let ready = deps
            .iter()
            .filter(|d| d.child_node_id == child.child_node_id)
            .all(|d| succeeded(d.parent_node_id));
        if !ready {
            continue;
        }
        let node = store
            .jobs
            .get_node(child.child_node_id)
            .await?
            .ok_or_else(|| {
                FleetError::DatabaseOperation(format!("作业节点 {} 不存在", child.child_node_id))
            })?;
        if let Some(instance) = enqueue_node(store, job_instance_id, &node, queue).await? {
            enqueued.push(instance);
        }
    }
    Ok(enqueued)
}
