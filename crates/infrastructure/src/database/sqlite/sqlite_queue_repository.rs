use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Row, SqlitePool};
use taskfleet_core::{FleetError, FleetResult, QueueRecord, QueueRepository};
use tracing::debug;

pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_queue(row: &sqlx::sqlite::SqliteRow) -> FleetResult<QueueRecord> {
        let members: Json<Vec<String>> = row.try_get("members")?;
        Ok(QueueRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            kind: row.try_get("kind")?,
            members: members.0,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    async fn create(&self, queue: &QueueRecord) -> FleetResult<QueueRecord> {
        let result = sqlx::query(
            "INSERT INTO queues (name, kind, members, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&queue.name)
        .bind(&queue.kind)
        .bind(Json(&queue.members))
        .bind(queue.created_at)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        let mut created = queue.clone();
        created.id = result.last_insert_rowid();
        debug!("创建队列成功: {} ({})", created.name, created.kind);
        Ok(created)
    }

    async fn get_by_name(&self, name: &str) -> FleetResult<Option<QueueRecord>> {
        let row = sqlx::query("SELECT id, name, kind, members, created_at FROM queues WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        row.as_ref().map(Self::row_to_queue).transpose()
    }
}
