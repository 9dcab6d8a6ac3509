use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use taskfleet_core::config::DatabaseConfig;
use taskfleet_core::{FleetError, FleetResult, QueueRegistry, Store, DB_QUEUE_KIND, QUEUE_GROUP_KIND};
use tracing::info;

use super::migrations::run_migrations;
use super::sqlite::{
    SqliteDaemonRepository, SqliteInstanceRepository, SqliteJobRepository,
    SqliteQueueRepository, SqliteScheduleRepository, SqliteTaskRepository,
};
use crate::queue::{DbQueueLoader, QueueGroupLoader};

/// SQLite 连接池与仓储工厂
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> FleetResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(FleetError::Database)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.connection_timeout_seconds));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(options)
            .await
            .map_err(FleetError::Database)?;

        info!("已连接数据库: {}", config.url);
        Ok(Self { pool })
    }

    /// 单连接内存库，测试使用
    pub async fn in_memory() -> FleetResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(FleetError::Database)?;
        let manager = Self { pool };
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> FleetResult<()> {
        run_migrations(&self.pool).await
    }

    pub async fn health_check(&self) -> FleetResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// 内置 `db` 与 `group` 两种队列加载器的注册表
    pub fn queue_registry(&self) -> QueueRegistry {
        QueueRegistry::new(Arc::new(SqliteQueueRepository::new(self.pool.clone())))
            .with_loader(DB_QUEUE_KIND, Arc::new(DbQueueLoader::new(self.pool.clone())))
            .with_loader(QUEUE_GROUP_KIND, Arc::new(QueueGroupLoader))
    }

    pub fn store(&self) -> Store {
        self.store_with_queues(self.queue_registry())
    }

    pub fn store_with_queues(&self, queues: QueueRegistry) -> Store {
        Store {
            daemons: Arc::new(SqliteDaemonRepository::new(self.pool.clone())),
            tasks: Arc::new(SqliteTaskRepository::new(self.pool.clone())),
            instances: Arc::new(SqliteInstanceRepository::new(self.pool.clone())),
            schedules: Arc::new(SqliteScheduleRepository::new(self.pool.clone())),
            jobs: Arc::new(SqliteJobRepository::new(self.pool.clone())),
            queues: Arc::new(queues),
        }
    }
}
