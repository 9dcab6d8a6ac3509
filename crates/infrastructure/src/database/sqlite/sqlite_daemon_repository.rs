use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use taskfleet_core::{
    DaemonKind, DaemonRecord, DaemonRepository, DaemonStatus, FleetError, FleetResult, Request,
};
use tracing::debug;

use crate::database::FINAL_DAEMON_STATUSES;

const DAEMON_COLUMNS: &str =
    "id, kind, host, pid, status, request, heartbeat, started, ended, queue, concurrent, created_at";

pub struct SqliteDaemonRepository {
    pool: SqlitePool,
}

impl SqliteDaemonRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_daemon(row: &sqlx::sqlite::SqliteRow) -> FleetResult<DaemonRecord> {
        Ok(DaemonRecord {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            host: row.try_get("host")?,
            pid: row.try_get("pid")?,
            status: row.try_get("status")?,
            request: row.try_get("request")?,
            heartbeat: row.try_get("heartbeat")?,
            started: row.try_get("started")?,
            ended: row.try_get("ended")?,
            queue: row.try_get("queue")?,
            concurrent: row.try_get("concurrent")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn require(&self, id: i64) -> FleetResult<DaemonRecord> {
        self.get_by_id(id)
            .await?
            .ok_or(FleetError::DaemonNotFound { id })
    }
}

#[async_trait]
impl DaemonRepository for SqliteDaemonRepository {
    async fn create(&self, daemon: &DaemonRecord) -> FleetResult<DaemonRecord> {
        let result = sqlx::query(
            r#"
            INSERT INTO daemons (kind, host, pid, status, request, heartbeat, started, ended, queue, concurrent, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(daemon.kind)
        .bind(&daemon.host)
        .bind(daemon.pid)
        .bind(daemon.status)
        .bind(daemon.request)
        .bind(daemon.heartbeat)
        .bind(daemon.started)
        .bind(daemon.ended)
        .bind(&daemon.queue)
        .bind(daemon.concurrent)
        .bind(daemon.created_at)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        let mut created = daemon.clone();
        created.id = result.last_insert_rowid();
        debug!("登记守护进程成功: {} {}", created.kind, created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> FleetResult<Option<DaemonRecord>> {
        let row = sqlx::query(&format!("SELECT {DAEMON_COLUMNS} FROM daemons WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        row.as_ref().map(Self::row_to_daemon).transpose()
    }

    async fn update_status(&self, id: i64, status: DaemonStatus) -> FleetResult<()> {
        let result = sqlx::query("UPDATE daemons SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        if result.rows_affected() == 0 {
            return Err(FleetError::DaemonNotFound { id });
        }
        debug!("更新守护进程 {} 状态为 {}", id, status);
        Ok(())
    }

    async fn mark_started(&self, id: i64, at: DateTime<Utc>) -> FleetResult<()> {
        let result = sqlx::query("UPDATE daemons SET started = ?, heartbeat = ? WHERE id = ?")
            .bind(at)
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        if result.rows_affected() == 0 {
            return Err(FleetError::DaemonNotFound { id });
        }
        Ok(())
    }

    async fn mark_ended(&self, id: i64, at: DateTime<Utc>) -> FleetResult<()> {
        let result = sqlx::query("UPDATE daemons SET ended = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        if result.rows_affected() == 0 {
            return Err(FleetError::DaemonNotFound { id });
        }
        Ok(())
    }

    async fn heartbeat(&self, id: i64, at: DateTime<Utc>) -> FleetResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE daemons SET heartbeat = ? WHERE id = ? AND status NOT IN {FINAL_DAEMON_STATUSES}"
        ))
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn make_request(&self, id: i64, request: Request) -> FleetResult<bool> {
        let daemon = self.require(id).await?;
        if !daemon.accepts(request) {
            debug!(
                "守护进程 {} ({} {}) 拒绝请求 {}",
                id, daemon.kind, daemon.status, request
            );
            return Ok(false);
        }

        // 状态可能在读取之后进入终态，条件写入保证不会给终态记录留下请求
        let result = sqlx::query(&format!(
            "UPDATE daemons SET request = ? WHERE id = ? AND status NOT IN {FINAL_DAEMON_STATUSES}"
        ))
        .bind(request)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        let accepted = result.rows_affected() == 1;
        if accepted {
            debug!("守护进程 {} 收到请求 {}", id, request);
        }
        Ok(accepted)
    }

    async fn clear_request(&self, id: i64, seen: Request) -> FleetResult<bool> {
        let result = sqlx::query("UPDATE daemons SET request = NULL WHERE id = ? AND request = ?")
            .bind(id)
            .bind(seen)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_alive(
        &self,
        kind: DaemonKind,
        now: DateTime<Utc>,
        failure_window: Duration,
    ) -> FleetResult<Vec<DaemonRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {DAEMON_COLUMNS} FROM daemons WHERE kind = ? AND status NOT IN {FINAL_DAEMON_STATUSES} ORDER BY id"
        ))
        .bind(kind)
        .fetch_all(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        let mut alive = Vec::new();
        for row in rows {
            let daemon = Self::row_to_daemon(&row)?;
            if daemon.is_alive(now, failure_window) {
                alive.push(daemon);
            }
        }
        Ok(alive)
    }

    async fn handle(
        &self,
        id: i64,
        now: DateTime<Utc>,
        failure_window: Duration,
    ) -> FleetResult<bool> {
        let daemon = self.require(id).await?;
        if daemon.status == DaemonStatus::Handled || daemon.is_alive(now, failure_window) {
            return Ok(false);
        }

        let result = sqlx::query("UPDATE daemons SET status = ? WHERE id = ? AND status = ?")
            .bind(DaemonStatus::Handled)
            .bind(id)
            .bind(daemon.status)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        let handled = result.rows_affected() == 1;
        if handled {
            debug!("守护进程 {} 已由 {} 标记为 HANDLED", id, daemon.status);
        }
        Ok(handled)
    }
}
