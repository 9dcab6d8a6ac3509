use async_trait::async_trait;

use crate::errors::FleetResult;
use crate::models::Instance;

/// 工作队列契约
///
/// 任何满足该契约的后端（存储队列、托管消息队列）都可以互换使用。
/// 只有已持久化且仍为 CREATED 的任务实例才能入队，否则返回 `InvalidItem`。
#[async_trait]
pub trait Queue: Send + Sync {
    fn name(&self) -> &str;

    async fn push(&self, item: &Instance) -> FleetResult<()>;

    /// 移除并返回下一个元素，队列为空时返回 None
    async fn pop(&self) -> FleetResult<Option<Instance>>;

    /// 返回下一个元素但不移除
    async fn peek(&self) -> FleetResult<Option<Instance>>;

    async fn count(&self) -> FleetResult<u64>;
}
