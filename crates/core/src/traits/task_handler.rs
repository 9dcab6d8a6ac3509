//! 任务处理器接口
//!
//! 每种任务类型（`shell`、`job` ...）对应一个处理器，在子进程中运行单个任务实例。

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::FleetResult;
use crate::models::{Instance, Task};
use crate::store::Store;

/// 处理器运行时可见的上下文
#[derive(Clone)]
pub struct TaskContext {
    pub instance: Instance,
    pub task: Task,
    pub store: Store,
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 任务类型名称
    fn kind(&self) -> &str;

    /// 运行任务；`Ok(false)` 表示失败，`Err` 同样记为失败并写入日志
    async fn run(&self, ctx: &TaskContext) -> FleetResult<bool>;

    /// 超时或被中断后运行的收尾动作
    async fn finalize(&self, _ctx: &TaskContext) -> FleetResult<()> {
        Ok(())
    }
}

pub type SharedTaskHandler = Arc<dyn TaskHandler>;
