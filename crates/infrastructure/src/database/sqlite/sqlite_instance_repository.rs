use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use taskfleet_core::{
    FleetError, FleetResult, Instance, InstanceRepository, InstanceStatus, Request, ScheduleKey,
};
use tracing::{debug, instrument};

pub(crate) const INSTANCE_COLUMNS: &str = "id, task_id, status, request, revision, executor_id, schedule_kind, schedule_id, job_instance_id, job_node_id, enqueued_at, started_at, ended_at, created_at";

/// 查询结果行转换为实例，队列实现也复用该函数
pub(crate) fn row_to_instance(row: &sqlx::sqlite::SqliteRow) -> FleetResult<Instance> {
    let schedule_kind: Option<String> = row.try_get("schedule_kind")?;
    let schedule_id: Option<i64> = row.try_get("schedule_id")?;
    let schedule = match (schedule_kind, schedule_id) {
        (Some(kind), Some(id)) => Some(ScheduleKey::from_parts(&kind, id).ok_or_else(|| {
            FleetError::Serialization(format!("未知的调度类型: {kind}"))
        })?),
        _ => None,
    };

    Ok(Instance {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        status: row.try_get("status")?,
        request: row.try_get("request")?,
        revision: row.try_get("revision")?,
        executor_id: row.try_get("executor_id")?,
        schedule,
        job_instance_id: row.try_get("job_instance_id")?,
        job_node_id: row.try_get("job_node_id")?,
        enqueued: row.try_get("enqueued_at")?,
        started: row.try_get("started_at")?,
        ended: row.try_get("ended_at")?,
        created_at: row.try_get("created_at")?,
    })
}

pub struct SqliteInstanceRepository {
    pool: SqlitePool,
}

impl SqliteInstanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn require(&self, id: i64) -> FleetResult<Instance> {
        self.get_by_id(id)
            .await?
            .ok_or(FleetError::InstanceNotFound { id })
    }

    async fn insert(&self, instance: &Instance, or_ignore: bool) -> FleetResult<Option<Instance>> {
        let verb = if or_ignore {
            "INSERT OR IGNORE"
        } else {
            "INSERT"
        };
        let result = sqlx::query(&format!(
            r#"
            {verb} INTO instances (task_id, status, request, revision, executor_id, schedule_kind, schedule_id,
                                   job_instance_id, job_node_id, enqueued_at, started_at, ended_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        ))
        .bind(instance.task_id)
        .bind(instance.status)
        .bind(instance.request)
        .bind(&instance.revision)
        .bind(instance.executor_id)
        .bind(instance.schedule.map(|key| key.kind()))
        .bind(instance.schedule.map(|key| key.id()))
        .bind(instance.job_instance_id)
        .bind(instance.job_node_id)
        .bind(instance.enqueued)
        .bind(instance.started)
        .bind(instance.ended)
        .bind(instance.created_at)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let mut created = instance.clone();
        created.id = result.last_insert_rowid();
        Ok(Some(created))
    }
}

#[async_trait]
impl InstanceRepository for SqliteInstanceRepository {
    #[instrument(skip(self, instance), fields(task_id = instance.task_id))]
    async fn create(&self, instance: &Instance) -> FleetResult<Instance> {
        let created = self.insert(instance, false).await?.ok_or_else(|| {
            FleetError::DatabaseOperation(format!("任务 {} 的实例未能写入", instance.task_id))
        })?;
        debug!("创建实例成功: {} (任务 {})", created.id, created.task_id);
        Ok(created)
    }

    async fn create_for_job_node(&self, instance: &Instance) -> FleetResult<Option<Instance>> {
        if instance.job_instance_id.is_none() || instance.job_node_id.is_none() {
            return Err(FleetError::InvalidItem(
                "作业节点实例必须带有作业实例与节点标识".to_string(),
            ));
        }
        // 唯一索引 (job_instance_id, job_node_id) 保证同一节点只创建一次
        let created = self.insert(instance, true).await?;
        if let Some(created) = &created {
            debug!(
                "作业实例 {:?} 节点 {:?} 创建实例 {}",
                created.job_instance_id, created.job_node_id, created.id
            );
        }
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> FleetResult<Option<Instance>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        row.as_ref().map(row_to_instance).transpose()
    }

    async fn transition(&self, id: i64, status: InstanceStatus) -> FleetResult<Instance> {
        let current = self.require(id).await?;
        if !current.status.can_transition_to(status) {
            return Err(FleetError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let now = Utc::now();
        let started: Option<DateTime<Utc>> = (status == InstanceStatus::Running).then_some(now);
        let ended: Option<DateTime<Utc>> =
            (status.is_final() && status != InstanceStatus::Handled).then_some(now);

        // 以读取到的状态为条件，并发迁移只有一方成功
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET status = ?, started_at = COALESCE(?, started_at), ended_at = COALESCE(?, ended_at)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(status)
        .bind(started)
        .bind(ended)
        .bind(id)
        .bind(current.status)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        if result.rows_affected() == 0 {
            let latest = self.require(id).await?;
            return Err(FleetError::InvalidTransition {
                from: latest.status,
                to: status,
            });
        }

        debug!("实例 {} 状态 {} -> {}", id, current.status, status);
        self.require(id).await
    }

    async fn set_enqueued(&self, id: i64, at: DateTime<Utc>) -> FleetResult<()> {
        let result = sqlx::query("UPDATE instances SET enqueued_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        if result.rows_affected() == 0 {
            return Err(FleetError::InstanceNotFound { id });
        }
        Ok(())
    }

    async fn set_executor(&self, id: i64, executor_id: i64) -> FleetResult<()> {
        let result = sqlx::query("UPDATE instances SET executor_id = ? WHERE id = ?")
            .bind(executor_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        if result.rows_affected() == 0 {
            return Err(FleetError::InstanceNotFound { id });
        }
        Ok(())
    }

    async fn make_request(&self, id: i64, request: Request) -> FleetResult<bool> {
        let instance = self.require(id).await?;
        if !instance.accepts(request) {
            debug!("实例 {} ({}) 拒绝请求 {}", id, instance.status, request);
            return Ok(false);
        }

        let result = sqlx::query(
            "UPDATE instances SET request = ? WHERE id = ? AND status IN ('CREATED', 'RUNNING')",
        )
        .bind(request)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn clear_request(&self, id: i64, seen: Request) -> FleetResult<bool> {
        let result =
            sqlx::query("UPDATE instances SET request = NULL WHERE id = ? AND request = ?")
                .bind(id)
                .bind(seen)
                .execute(&self.pool)
                .await
                .map_err(FleetError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn handle(&self, id: i64) -> FleetResult<bool> {
        let instance = self.require(id).await?;
        if !instance.status.is_failure() {
            return Ok(false);
        }

        let result = sqlx::query("UPDATE instances SET status = ? WHERE id = ? AND status = ?")
            .bind(InstanceStatus::Handled)
            .bind(id)
            .bind(instance.status)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        let handled = result.rows_affected() == 1;
        if handled {
            debug!("实例 {} 已由 {} 标记为 HANDLED", id, instance.status);
        }
        Ok(handled)
    }

    async fn list_for_job(&self, job_instance_id: i64) -> FleetResult<Vec<Instance>> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE job_instance_id = ? ORDER BY id"
        ))
        .bind(job_instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        rows.iter().map(row_to_instance).collect()
    }

    async fn list_for_schedule(&self, key: ScheduleKey) -> FleetResult<Vec<Instance>> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE schedule_kind = ? AND schedule_id = ? ORDER BY id"
        ))
        .bind(key.kind())
        .bind(key.id())
        .fetch_all(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        rows.iter().map(row_to_instance).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::run_migrations;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use taskfleet_core::Task;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn task(id: i64) -> Task {
        let mut task = Task::new("t", "shell", json!({})).with_revision("r1");
        task.id = id;
        task
    }

    #[tokio::test]
    async fn test_create_records_schedule_and_revision() {
        let repo = SqliteInstanceRepository::new(setup_test_db().await);
        let created = repo
            .create(&Instance::for_schedule(&task(1), ScheduleKey::Cron(4)))
            .await
            .unwrap();

        let loaded = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InstanceStatus::Created);
        assert_eq!(loaded.schedule, Some(ScheduleKey::Cron(4)));
        assert_eq!(loaded.revision.as_deref(), Some("r1"));

        let listed = repo.list_for_schedule(ScheduleKey::Cron(4)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(repo
            .list_for_schedule(ScheduleKey::Interval(4))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_transition_follows_state_machine() {
        let repo = SqliteInstanceRepository::new(setup_test_db().await);
        let created = repo.create(&Instance::new(&task(1))).await.unwrap();

        let running = repo
            .transition(created.id, InstanceStatus::Running)
            .await
            .unwrap();
        assert!(running.started.is_some());
        assert!(running.ended.is_none());

        let result = repo.transition(created.id, InstanceStatus::Created).await;
        assert!(matches!(
            result,
            Err(FleetError::InvalidTransition {
                from: InstanceStatus::Running,
                to: InstanceStatus::Created
            })
        ));

        let finished = repo
            .transition(created.id, InstanceStatus::Success)
            .await
            .unwrap();
        assert!(finished.ended.is_some());
        assert!(finished.execution_duration_ms().unwrap() >= 0);
        assert!(repo
            .transition(created.id, InstanceStatus::Failure)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_job_node_instance_created_once() {
        let repo = SqliteInstanceRepository::new(setup_test_db().await);
        let first = repo
            .create_for_job_node(&Instance::for_job_node(&task(2), 10, 3))
            .await
            .unwrap();
        assert!(first.is_some());
        let again = repo
            .create_for_job_node(&Instance::for_job_node(&task(2), 10, 3))
            .await
            .unwrap();
        assert!(again.is_none());

        repo.create_for_job_node(&Instance::for_job_node(&task(2), 10, 4))
            .await
            .unwrap();
        assert_eq!(repo.list_for_job(10).await.unwrap().len(), 2);

        assert!(repo.create_for_job_node(&Instance::new(&task(2))).await.is_err());
    }

    #[tokio::test]
    async fn test_kill_request_and_handle() {
        let repo = SqliteInstanceRepository::new(setup_test_db().await);
        let created = repo.create(&Instance::new(&task(1))).await.unwrap();
        repo.transition(created.id, InstanceStatus::Running)
            .await
            .unwrap();

        assert!(!repo.make_request(created.id, Request::Pause).await.unwrap());
        assert!(repo.make_request(created.id, Request::Kill).await.unwrap());

        repo.transition(created.id, InstanceStatus::Interrupted)
            .await
            .unwrap();
        assert!(repo.clear_request(created.id, Request::Kill).await.unwrap());

        assert!(repo.handle(created.id).await.unwrap());
        let handled = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(handled.status, InstanceStatus::Handled);
        assert!(!repo.handle(created.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_success_cannot_be_handled() {
        let repo = SqliteInstanceRepository::new(setup_test_db().await);
        let created = repo.create(&Instance::new(&task(1))).await.unwrap();
        repo.transition(created.id, InstanceStatus::Running)
            .await
            .unwrap();
        repo.transition(created.id, InstanceStatus::Success)
            .await
            .unwrap();
        assert!(!repo.handle(created.id).await.unwrap());
        assert!(!repo.make_request(created.id, Request::Kill).await.unwrap());
    }
}
