use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Row, SqlitePool};
use taskfleet_core::{FleetError, FleetResult, Task, TaskRepository};
use tracing::{debug, instrument};

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> FleetResult<Task> {
        let parameters: Json<serde_json::Value> = row.try_get("parameters")?;
        Ok(Task {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            kind: row.try_get("kind")?,
            parameters: parameters.0,
            timeout_seconds: row.try_get("timeout_seconds")?,
            revision: row.try_get("revision")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(task_name = %task.name, task_kind = %task.kind))]
    async fn create(&self, task: &Task) -> FleetResult<Task> {
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (name, description, kind, parameters, timeout_seconds, revision, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.kind)
        .bind(Json(&task.parameters))
        .bind(task.timeout_seconds)
        .bind(&task.revision)
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        let mut created = task.clone();
        created.id = result.last_insert_rowid();
        debug!("创建任务成功: {} (ID: {})", created.name, created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> FleetResult<Option<Task>> {
        let row = sqlx::query(
            "SELECT id, name, description, kind, parameters, timeout_seconds, revision, created_at FROM tasks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn set_revision(&self, id: i64, revision: Option<&str>) -> FleetResult<()> {
        let result = sqlx::query("UPDATE tasks SET revision = ? WHERE id = ?")
            .bind(revision)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        if result.rows_affected() == 0 {
            return Err(FleetError::TaskNotFound { id });
        }
        debug!("任务 {} 修订版本更新为 {:?}", id, revision);
        Ok(())
    }
}
