use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use taskfleet_core::{
    CronSchedule, FleetError, FleetResult, Schedule, ScheduleKey, ScheduleRecord,
    ScheduleRepository,
};
use tracing::{debug, instrument};

use crate::database::FINAL_DAEMON_STATUSES;

const INTERVAL_COLUMNS: &str = "id, task_id, queue, repetitions, remaining, period_seconds, next, make_up, scheduler_id, changed, deleted, created_at, updated_at";
const CRON_COLUMNS: &str = "id, task_id, queue, repetitions, remaining, base, encoding, make_up, scheduler_id, changed, deleted, created_at, updated_at";

fn table(key: ScheduleKey) -> &'static str {
    match key {
        ScheduleKey::Interval(_) => "schedules",
        ScheduleKey::Cron(_) => "cron_schedules",
    }
}

/// 归属调度器仍存活（非终态且心跳未过期）的条件，参数为心跳截止时刻
fn orphaned_clause() -> String {
    format!(
        "(scheduler_id IS NULL OR scheduler_id NOT IN (SELECT id FROM daemons WHERE status NOT IN {FINAL_DAEMON_STATUSES} AND heartbeat >= ?))"
    )
}

pub struct SqliteScheduleRepository {
    pool: SqlitePool,
}

impl SqliteScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_interval(row: &sqlx::sqlite::SqliteRow) -> FleetResult<Schedule> {
        Ok(Schedule {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            queue: row.try_get("queue")?,
            repetitions: row.try_get("repetitions")?,
            remaining: row.try_get("remaining")?,
            period_seconds: row.try_get("period_seconds")?,
            next: row.try_get("next")?,
            make_up: row.try_get("make_up")?,
            scheduler_id: row.try_get("scheduler_id")?,
            changed: row.try_get("changed")?,
            deleted: row.try_get("deleted")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_cron(row: &sqlx::sqlite::SqliteRow) -> FleetResult<CronSchedule> {
        Ok(CronSchedule {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            queue: row.try_get("queue")?,
            repetitions: row.try_get("repetitions")?,
            remaining: row.try_get("remaining")?,
            base: row.try_get("base")?,
            encoding: row.try_get("encoding")?,
            make_up: row.try_get("make_up")?,
            scheduler_id: row.try_get("scheduler_id")?,
            changed: row.try_get("changed")?,
            deleted: row.try_get("deleted")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            next: None,
        })
    }

    async fn fetch_cron(&self, filter: &str, binds: &[i64]) -> FleetResult<Vec<ScheduleRecord>> {
        let sql = format!("SELECT {CRON_COLUMNS} FROM cron_schedules WHERE {filter} ORDER BY id");
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        rows.iter()
            .map(|row| Self::row_to_cron(row).map(ScheduleRecord::Cron))
            .collect()
    }

    async fn fetch_interval(
        &self,
        filter: &str,
        binds: &[i64],
    ) -> FleetResult<Vec<ScheduleRecord>> {
        let sql = format!("SELECT {INTERVAL_COLUMNS} FROM schedules WHERE {filter} ORDER BY id");
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        rows.iter()
            .map(|row| Self::row_to_interval(row).map(ScheduleRecord::Interval))
            .collect()
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    #[instrument(skip(self, schedule), fields(task_id = schedule.task_id))]
    async fn create_interval(&self, schedule: &Schedule) -> FleetResult<Schedule> {
        if schedule.period_seconds < 0 || schedule.repetitions < 0 {
            return Err(FleetError::InvalidSchedule(format!(
                "周期 {} 与重复次数 {} 不能为负",
                schedule.period_seconds, schedule.repetitions
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO schedules (task_id, queue, repetitions, remaining, period_seconds, next, make_up,
                                   scheduler_id, changed, deleted, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(schedule.task_id)
        .bind(&schedule.queue)
        .bind(schedule.repetitions)
        .bind(schedule.remaining)
        .bind(schedule.period_seconds)
        .bind(schedule.next)
        .bind(schedule.make_up)
        .bind(schedule.scheduler_id)
        .bind(schedule.changed)
        .bind(schedule.deleted)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        let mut created = schedule.clone();
        created.id = result.last_insert_rowid();
        debug!("创建固定周期调度成功: {}", created.key());
        Ok(created)
    }

    #[instrument(skip(self, schedule), fields(task_id = schedule.task_id))]
    async fn create_cron(&self, schedule: &CronSchedule) -> FleetResult<CronSchedule> {
        if schedule.repetitions < 0 {
            return Err(FleetError::InvalidSchedule(format!(
                "重复次数 {} 不能为负",
                schedule.repetitions
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO cron_schedules (task_id, queue, repetitions, remaining, base, encoding, make_up,
                                        scheduler_id, changed, deleted, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(schedule.task_id)
        .bind(&schedule.queue)
        .bind(schedule.repetitions)
        .bind(schedule.remaining)
        .bind(schedule.base)
        .bind(&schedule.encoding)
        .bind(schedule.make_up)
        .bind(schedule.scheduler_id)
        .bind(schedule.changed)
        .bind(schedule.deleted)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        let mut created = schedule.clone();
        created.id = result.last_insert_rowid();
        debug!("创建CRON调度成功: {} ({})", created.key(), created.encoding);
        Ok(created)
    }

    async fn get(&self, key: ScheduleKey) -> FleetResult<Option<ScheduleRecord>> {
        let mut records = match key {
            ScheduleKey::Interval(id) => self.fetch_interval("id = ?", &[id]).await?,
            ScheduleKey::Cron(id) => self.fetch_cron("id = ?", &[id]).await?,
        };
        Ok(records.pop())
    }

    async fn list_claimable(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        failure_window: Duration,
    ) -> FleetResult<Vec<ScheduleRecord>> {
        let cutoff = now - failure_window;
        let orphaned = orphaned_clause();

        // CRON 调度优先，剩余额度留给固定周期调度
        let sql = format!(
            "SELECT {CRON_COLUMNS} FROM cron_schedules WHERE deleted = 0 AND (repetitions = 0 OR remaining > 0) AND {orphaned} ORDER BY id LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(FleetError::Database)?;
        let mut records = rows
            .iter()
            .map(|row| Self::row_to_cron(row).map(ScheduleRecord::Cron))
            .collect::<FleetResult<Vec<_>>>()?;

        let left = limit - records.len() as i64;
        if left > 0 {
            let sql = format!(
                "SELECT {INTERVAL_COLUMNS} FROM schedules WHERE deleted = 0 AND next IS NOT NULL AND (repetitions = 0 OR remaining > 0) AND {orphaned} ORDER BY id LIMIT ?"
            );
            let rows = sqlx::query(&sql)
                .bind(cutoff)
                .bind(left)
                .fetch_all(&self.pool)
                .await
                .map_err(FleetError::Database)?;
            for row in &rows {
                records.push(ScheduleRecord::Interval(Self::row_to_interval(row)?));
            }
        }

        debug!("可认领调度 {} 条", records.len());
        Ok(records)
    }

    async fn claim(
        &self,
        key: ScheduleKey,
        expected: Option<i64>,
        scheduler_id: i64,
    ) -> FleetResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET scheduler_id = ?, updated_at = ? WHERE id = ? AND scheduler_id IS ?",
            table(key)
        ))
        .bind(scheduler_id)
        .bind(Utc::now())
        .bind(key.id())
        .bind(expected)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: ScheduleKey, scheduler_id: i64) -> FleetResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET scheduler_id = NULL WHERE id = ? AND scheduler_id = ?",
            table(key)
        ))
        .bind(key.id())
        .bind(scheduler_id)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_all(&self, scheduler_id: i64) -> FleetResult<u64> {
        let mut released = 0;
        for table in ["cron_schedules", "schedules"] {
            let result = sqlx::query(&format!(
                "UPDATE {table} SET scheduler_id = NULL WHERE scheduler_id = ?"
            ))
            .bind(scheduler_id)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;
            released += result.rows_affected();
        }
        debug!("调度器 {} 释放了 {} 条调度", scheduler_id, released);
        Ok(released)
    }

    async fn save_progress(&self, record: &ScheduleRecord) -> FleetResult<()> {
        let result = match record {
            ScheduleRecord::Interval(s) => {
                sqlx::query(
                    "UPDATE schedules SET remaining = ?, next = ?, updated_at = ? WHERE id = ?",
                )
                .bind(s.remaining)
                .bind(s.next)
                .bind(s.updated_at)
                .bind(s.id)
                .execute(&self.pool)
                .await
            }
            ScheduleRecord::Cron(c) => {
                sqlx::query(
                    "UPDATE cron_schedules SET remaining = ?, base = ?, updated_at = ? WHERE id = ?",
                )
                .bind(c.remaining)
                .bind(c.base)
                .bind(c.updated_at)
                .bind(c.id)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(FleetError::Database)?;

        if result.rows_affected() == 0 {
            return Err(FleetError::ScheduleNotFound {
                key: record.key().to_string(),
            });
        }
        Ok(())
    }

    async fn list_changed(&self, scheduler_id: i64) -> FleetResult<Vec<ScheduleRecord>> {
        let filter = "scheduler_id = ? AND changed = 1";
        let mut records = self.fetch_cron(filter, &[scheduler_id]).await?;
        records.extend(self.fetch_interval(filter, &[scheduler_id]).await?);
        Ok(records)
    }

    async fn set_changed(&self, key: ScheduleKey, changed: bool) -> FleetResult<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET changed = ? WHERE id = ?",
            table(key)
        ))
        .bind(changed)
        .bind(key.id())
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        if result.rows_affected() == 0 {
            return Err(FleetError::ScheduleNotFound {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn soft_delete(&self, key: ScheduleKey) -> FleetResult<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET deleted = 1, updated_at = ? WHERE id = ?",
            table(key)
        ))
        .bind(Utc::now())
        .bind(key.id())
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        if result.rows_affected() == 0 {
            return Err(FleetError::ScheduleNotFound {
                key: key.to_string(),
            });
        }
        debug!("调度 {} 已软删除", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::run_migrations;
    use crate::database::sqlite::SqliteDaemonRepository;
    use sqlx::sqlite::SqlitePoolOptions;
    use taskfleet_core::{DaemonKind, DaemonRecord, DaemonRepository, DaemonStatus};

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn running_scheduler(pool: &SqlitePool, heartbeat: DateTime<Utc>) -> i64 {
        let repo = SqliteDaemonRepository::new(pool.clone());
        let daemon = repo
            .create(&DaemonRecord::new(DaemonKind::Scheduler))
            .await
            .unwrap();
        repo.mark_started(daemon.id, heartbeat).await.unwrap();
        repo.update_status(daemon.id, DaemonStatus::Running)
            .await
            .unwrap();
        daemon.id
    }

    #[tokio::test]
    async fn test_create_and_get_both_kinds() {
        let repo = SqliteScheduleRepository::new(setup_test_db().await);
        let interval = repo
            .create_interval(&Schedule::new(1, "default", 60, 5, Utc::now()).with_make_up(true))
            .await
            .unwrap();
        let cron = repo
            .create_cron(&CronSchedule::new(1, "default", "h3m0s0", 0).unwrap())
            .await
            .unwrap();

        match repo.get(interval.key()).await.unwrap() {
            Some(ScheduleRecord::Interval(s)) => {
                assert_eq!(s.period_seconds, 60);
                assert_eq!(s.remaining, 5);
                assert!(s.make_up);
            }
            other => panic!("unexpected record: {other:?}"),
        }
        match repo.get(cron.key()).await.unwrap() {
            Some(ScheduleRecord::Cron(c)) => assert_eq!(c.encoding, cron.encoding),
            other => panic!("unexpected record: {other:?}"),
        }
        assert!(repo.get(ScheduleKey::Cron(99)).await.unwrap().is_none());

        assert!(repo
            .create_interval(&Schedule::new(1, "default", -1, 0, Utc::now()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_claim_is_conditional() {
        let repo = SqliteScheduleRepository::new(setup_test_db().await);
        let key = repo
            .create_interval(&Schedule::new(1, "default", 60, 0, Utc::now()))
            .await
            .unwrap()
            .key();

        assert!(repo.claim(key, None, 1).await.unwrap());
        // 第二个调度器仍以为无主
        assert!(!repo.claim(key, None, 2).await.unwrap());
        assert!(!repo.release(key, 2).await.unwrap());
        assert!(repo.claim(key, Some(1), 2).await.unwrap());

        let record = repo.get(key).await.unwrap().unwrap();
        assert_eq!(record.scheduler_id(), Some(2));
        assert!(repo.release(key, 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_claimable_recovers_orphans() {
        let pool = setup_test_db().await;
        let repo = SqliteScheduleRepository::new(pool.clone());
        let window = Duration::seconds(12);
        let alive = running_scheduler(&pool, Utc::now()).await;
        let dead = running_scheduler(&pool, Utc::now() - Duration::minutes(10)).await;

        let owned_by_alive = repo
            .create_cron(&CronSchedule::new(1, "default", "s*", 0).unwrap())
            .await
            .unwrap()
            .key();
        let owned_by_dead = repo
            .create_cron(&CronSchedule::new(1, "default", "s*", 0).unwrap())
            .await
            .unwrap()
            .key();
        let free = repo
            .create_interval(&Schedule::new(1, "default", 60, 0, Utc::now()))
            .await
            .unwrap()
            .key();
        repo.claim(owned_by_alive, None, alive).await.unwrap();
        repo.claim(owned_by_dead, None, dead).await.unwrap();

        let claimable: Vec<ScheduleKey> = repo
            .list_claimable(10, Utc::now(), window)
            .await
            .unwrap()
            .iter()
            .map(|r| r.key())
            .collect();
        assert_eq!(claimable, vec![owned_by_dead, free]);

        // 批量上限先给 CRON 调度
        let capped = repo.list_claimable(1, Utc::now(), window).await.unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].key(), owned_by_dead);
    }

    #[tokio::test]
    async fn test_finished_and_deleted_are_not_claimable() {
        let repo = SqliteScheduleRepository::new(setup_test_db().await);
        let mut finished = Schedule::new(1, "default", 60, 1, Utc::now());
        finished.remaining = 0;
        repo.create_interval(&finished).await.unwrap();

        let deleted = repo
            .create_cron(&CronSchedule::new(1, "default", "s*", 0).unwrap())
            .await
            .unwrap()
            .key();
        repo.soft_delete(deleted).await.unwrap();

        let claimable = repo
            .list_claimable(10, Utc::now(), Duration::seconds(12))
            .await
            .unwrap();
        assert!(claimable.is_empty());
        assert!(repo.get(deleted).await.unwrap().unwrap().is_deleted());
    }

    #[tokio::test]
    async fn test_save_progress_and_changed_flags() {
        let repo = SqliteScheduleRepository::new(setup_test_db().await);
        let now = Utc::now();
        let schedule = repo
            .create_interval(&Schedule::new(1, "default", 60, 3, now - Duration::seconds(1)))
            .await
            .unwrap();
        repo.claim(schedule.key(), None, 7).await.unwrap();

        let mut record = repo.get(schedule.key()).await.unwrap().unwrap();
        record.enqueued(now).unwrap();
        repo.save_progress(&record).await.unwrap();
        let saved = repo.get(schedule.key()).await.unwrap().unwrap();
        assert_eq!(saved.remaining(), 2);

        repo.set_changed(schedule.key(), true).await.unwrap();
        let changed = repo.list_changed(7).await.unwrap();
        assert_eq!(changed.len(), 1);
        repo.set_changed(schedule.key(), false).await.unwrap();
        assert!(repo.list_changed(7).await.unwrap().is_empty());

        assert_eq!(repo.release_all(7).await.unwrap(), 1);
        assert_eq!(repo.release_all(7).await.unwrap(), 0);
    }
}
