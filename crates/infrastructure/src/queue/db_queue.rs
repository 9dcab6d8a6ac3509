use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use taskfleet_core::{FleetError, FleetResult, Instance, InstanceStatus, Queue};
use tracing::{debug, warn};

use crate::database::sqlite::sqlite_instance_repository::{row_to_instance, INSTANCE_COLUMNS};

/// 存储队列
///
/// 元素保存在 `queue_items` 表中，按入队时间先进先出。多个执行器可以同时出队，
/// 删除语句以元素 ID 为条件，同一元素只会被一个出队方拿到。
pub struct DbQueue {
    name: String,
    pool: SqlitePool,
}

impl DbQueue {
    pub fn new(name: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    async fn load_instance(&self, id: i64) -> FleetResult<Option<Instance>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        row.as_ref().map(row_to_instance).transpose()
    }

    async fn head(&self) -> FleetResult<Option<(i64, i64)>> {
        let row = sqlx::query(
            "SELECT id, instance_id FROM queue_items WHERE queue_name = ? ORDER BY enqueued_at, id LIMIT 1",
        )
        .bind(&self.name)
        .fetch_optional(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        match row {
            Some(row) => Ok(Some((row.try_get("id")?, row.try_get("instance_id")?))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Queue for DbQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, item: &Instance) -> FleetResult<()> {
        let status: Option<InstanceStatus> =
            sqlx::query_scalar("SELECT status FROM instances WHERE id = ?")
                .bind(item.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(FleetError::Database)?;

        match status {
            Some(InstanceStatus::Created) => {}
            Some(status) => {
                return Err(FleetError::InvalidItem(format!(
                    "任务实例 {} 状态为 {}，只有 CREATED 可以入队",
                    item.id, status
                )))
            }
            None => {
                return Err(FleetError::InvalidItem(format!(
                    "任务实例 {} 尚未持久化",
                    item.id
                )))
            }
        }

        sqlx::query("INSERT INTO queue_items (queue_name, instance_id, enqueued_at) VALUES (?, ?, ?)")
            .bind(&self.name)
            .bind(item.id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        debug!("队列 {} 入队实例 {}", self.name, item.id);
        Ok(())
    }

    async fn pop(&self) -> FleetResult<Option<Instance>> {
        loop {
            let Some((item_id, instance_id)) = self.head().await? else {
                return Ok(None);
            };

            let result = sqlx::query("DELETE FROM queue_items WHERE id = ?")
                .bind(item_id)
                .execute(&self.pool)
                .await
                .map_err(FleetError::Database)?;
            if result.rows_affected() == 0 {
                // 被其他执行器抢先取走
                continue;
            }

            match self.load_instance(instance_id).await? {
                Some(instance) => {
                    debug!("队列 {} 出队实例 {}", self.name, instance.id);
                    return Ok(Some(instance));
                }
                None => warn!("队列 {} 中的实例 {} 已不存在，跳过", self.name, instance_id),
            }
        }
    }

    async fn peek(&self) -> FleetResult<Option<Instance>> {
        match self.head().await? {
            Some((_, instance_id)) => self.load_instance(instance_id).await,
            None => Ok(None),
        }
    }

    async fn count(&self) -> FleetResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_items WHERE queue_name = ?")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await
            .map_err(FleetError::Database)?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use serde_json::json;
    use taskfleet_core::{Store, Task};

    async fn setup() -> (DatabaseManager, Store, Task) {
        let manager = DatabaseManager::in_memory().await.unwrap();
        let store = manager.store();
        let task = store
            .tasks
            .create(&Task::new("t", "shell", json!({"command": "true"})))
            .await
            .unwrap();
        (manager, store, task)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (manager, store, task) = setup().await;
        let queue = DbQueue::new("default", manager.pool().clone());

        let mut ids = Vec::new();
        for _ in 0..5 {
            let instance = store.instances.create(&Instance::new(&task)).await.unwrap();
            queue.push(&instance).await.unwrap();
            ids.push(instance.id);
        }
        assert_eq!(queue.count().await.unwrap(), 5);
        assert_eq!(queue.peek().await.unwrap().unwrap().id, ids[0]);

        let mut popped = Vec::new();
        while let Some(instance) = queue.pop().await.unwrap() {
            popped.push(instance.id);
        }
        assert_eq!(popped, ids);
        assert_eq!(queue.count().await.unwrap(), 0);
        assert!(queue.peek().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_unsaved_or_started_instances() {
        let (manager, store, task) = setup().await;
        let queue = DbQueue::new("default", manager.pool().clone());

        let unsaved = Instance::new(&task);
        assert!(matches!(
            queue.push(&unsaved).await,
            Err(FleetError::InvalidItem(_))
        ));

        let instance = store.instances.create(&Instance::new(&task)).await.unwrap();
        store
            .instances
            .transition(instance.id, InstanceStatus::Running)
            .await
            .unwrap();
        assert!(matches!(
            queue.push(&instance).await,
            Err(FleetError::InvalidItem(_))
        ));
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queues_are_isolated_by_name() {
        let (manager, store, task) = setup().await;
        let reports = DbQueue::new("reports", manager.pool().clone());
        let backups = DbQueue::new("backups", manager.pool().clone());

        let instance = store.instances.create(&Instance::new(&task)).await.unwrap();
        reports.push(&instance).await.unwrap();
        assert!(backups.pop().await.unwrap().is_none());
        assert_eq!(reports.pop().await.unwrap().unwrap().id, instance.id);
    }
}
