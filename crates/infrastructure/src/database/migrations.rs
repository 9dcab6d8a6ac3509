use sqlx::SqlitePool;
use taskfleet_core::{FleetError, FleetResult};
use tracing::debug;

/// 建表语句，全部可重复执行
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS daemons (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        host TEXT NOT NULL,
        pid INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'CREATED',
        request TEXT,
        heartbeat TEXT,
        started TEXT,
        ended TEXT,
        queue TEXT,
        concurrent INTEGER,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        kind TEXT NOT NULL,
        parameters TEXT NOT NULL DEFAULT '{}',
        timeout_seconds INTEGER,
        revision TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS instances (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'CREATED',
        request TEXT,
        revision TEXT,
        executor_id INTEGER,
        schedule_kind TEXT,
        schedule_id INTEGER,
        job_instance_id INTEGER,
        job_node_id INTEGER,
        enqueued_at TEXT,
        started_at TEXT,
        ended_at TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_instances_job_node ON instances(job_instance_id, job_node_id)",
    "CREATE INDEX IF NOT EXISTS idx_instances_schedule ON instances(schedule_kind, schedule_id)",
    r#"
    CREATE TABLE IF NOT EXISTS queues (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        members TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS queue_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        queue_name TEXT NOT NULL,
        instance_id INTEGER NOT NULL,
        enqueued_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_queue_items_order ON queue_items(queue_name, enqueued_at, id)",
    r#"
    CREATE TABLE IF NOT EXISTS schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL,
        queue TEXT NOT NULL,
        repetitions INTEGER NOT NULL DEFAULT 0,
        remaining INTEGER NOT NULL DEFAULT 0,
        period_seconds INTEGER NOT NULL,
        next TEXT,
        make_up INTEGER NOT NULL DEFAULT 0,
        scheduler_id INTEGER,
        changed INTEGER NOT NULL DEFAULT 0,
        deleted INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cron_schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL,
        queue TEXT NOT NULL,
        repetitions INTEGER NOT NULL DEFAULT 0,
        remaining INTEGER NOT NULL DEFAULT 0,
        base TEXT NOT NULL,
        encoding TEXT NOT NULL,
        make_up INTEGER NOT NULL DEFAULT 0,
        scheduler_id INTEGER,
        changed INTEGER NOT NULL DEFAULT 0,
        deleted INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_task_id INTEGER NOT NULL,
        task_id INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_dependencies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_task_id INTEGER NOT NULL,
        parent_node_id INTEGER NOT NULL,
        child_node_id INTEGER NOT NULL,
        UNIQUE(parent_node_id, child_node_id)
    )
    "#,
];

pub async fn run_migrations(pool: &SqlitePool) -> FleetResult<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(FleetError::Database)?;
    }
    debug!("数据库表结构已就绪");
    Ok(())
}
