use std::sync::Arc;

use async_trait::async_trait;
use taskfleet_core::{FleetError, FleetResult, Instance, Queue};

/// 按优先级组合的队列组
///
/// 出队时按成员顺序依次尝试，前面的队列清空后才会取后面的。队列组不支持入队，
/// 元素必须推入具体的成员队列。
pub struct QueueGroup {
    name: String,
    members: Vec<Arc<dyn Queue>>,
}

impl QueueGroup {
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn Queue>>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }

    pub fn members(&self) -> &[Arc<dyn Queue>] {
        &self.members
    }
}

#[async_trait]
impl Queue for QueueGroup {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, _item: &Instance) -> FleetResult<()> {
        Err(FleetError::NotImplemented(format!(
            "队列组 {} 不能直接入队",
            self.name
        )))
    }

    async fn pop(&self) -> FleetResult<Option<Instance>> {
        for member in &self.members {
            if let Some(item) = member.pop().await? {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    async fn peek(&self) -> FleetResult<Option<Instance>> {
        for member in &self.members {
            if let Some(item) = member.peek().await? {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    async fn count(&self) -> FleetResult<u64> {
        let mut total = 0;
        for member in &self.members {
            total += member.count().await?;
        }
        Ok(total)
    }
}
