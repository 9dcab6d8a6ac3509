use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;
use taskfleet_core::{FleetResult, Queue, QueueLoader, QueueRecord, QueueRegistry};
use tracing::debug;

use super::{DbQueue, QueueGroup};

/// `db` 类型：存储队列
pub struct DbQueueLoader {
    pool: SqlitePool,
}

impl DbQueueLoader {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueLoader for DbQueueLoader {
    async fn load(
        &self,
        record: &QueueRecord,
        _registry: &QueueRegistry,
        _depth: usize,
    ) -> FleetResult<Arc<dyn Queue>> {
        Ok(Arc::new(DbQueue::new(&record.name, self.pool.clone())))
    }
}

/// `group` 类型：成员按名称逐个解析，可以嵌套
pub struct QueueGroupLoader;

#[async_trait]
impl QueueLoader for QueueGroupLoader {
    async fn load(
        &self,
        record: &QueueRecord,
        registry: &QueueRegistry,
        depth: usize,
    ) -> FleetResult<Arc<dyn Queue>> {
        let mut members = Vec::with_capacity(record.members.len());
        for member in &record.members {
            members.push(registry.resolve_at_depth(member, depth + 1).await?);
        }
        debug!("加载队列组 {}，成员 {:?}", record.name, record.members);
        Ok(Arc::new(QueueGroup::new(&record.name, members)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use serde_json::json;
    use taskfleet_core::{FleetError, Instance, Task};

    #[tokio::test]
    async fn test_group_pops_by_priority() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        let store = manager.store();
        let repo = store.queues.repository();
        for name in ["urgent", "normal", "bulk"] {
            repo.create(&QueueRecord::db(name)).await.unwrap();
        }
        repo.create(&QueueRecord::group(
            "all",
            vec!["urgent".into(), "normal".into(), "bulk".into()],
        ))
        .await
        .unwrap();

        let task = store
            .tasks
            .create(&Task::new("t", "shell", json!({})))
            .await
            .unwrap();
        // 低优先级队列先入队，出队顺序仍按成员优先级
        let mut expected = Vec::new();
        for name in ["bulk", "normal", "urgent"] {
            let mut ids = Vec::new();
            for _ in 0..10 {
                let instance = store.enqueue_task(&task, name).await.unwrap();
                ids.push(instance.id);
            }
            expected.insert(0, ids);
        }
        let expected: Vec<i64> = expected.into_iter().flatten().collect();

        let group = store.queues.resolve("all").await.unwrap();
        assert_eq!(group.count().await.unwrap(), 30);

        let mut popped = Vec::new();
        while let Some(instance) = group.pop().await.unwrap() {
            popped.push(instance.id);
        }
        assert_eq!(popped, expected);
        assert_eq!(group.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_group_rejects_push() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        let store = manager.store();
        let repo = store.queues.repository();
        repo.create(&QueueRecord::db("a")).await.unwrap();
        repo.create(&QueueRecord::group("g", vec!["a".into()]))
            .await
            .unwrap();

        let task = store
            .tasks
            .create(&Task::new("t", "shell", json!({})))
            .await
            .unwrap();
        let instance = store.instances.create(&Instance::new(&task)).await.unwrap();
        let result = store.enqueue(&instance, "g").await;
        assert!(matches!(result, Err(FleetError::NotImplemented(_))));
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        let store = manager.store();
        let repo = store.queues.repository();
        repo.create(&QueueRecord::group("loop", vec!["loop".into()]))
            .await
            .unwrap();
        let mut odd = QueueRecord::db("odd");
        odd.kind = "kafka".to_string();
        repo.create(&odd).await.unwrap();

        assert!(matches!(
            store.queues.resolve("missing").await,
            Err(FleetError::QueueNotFound { .. })
        ));
        assert!(matches!(
            store.queues.resolve("loop").await,
            Err(FleetError::Configuration(_))
        ));
        assert!(matches!(
            store.queues.resolve("odd").await,
            Err(FleetError::UnknownQueueKind { .. })
        ));
    }
}
