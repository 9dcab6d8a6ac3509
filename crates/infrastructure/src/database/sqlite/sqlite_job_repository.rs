use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use taskfleet_core::{Dependency, FleetError, FleetResult, JobNode, JobRepository};
use tracing::debug;

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> FleetResult<JobNode> {
        Ok(JobNode {
            id: row.try_get("id")?,
            job_task_id: row.try_get("job_task_id")?,
            task_id: row.try_get("task_id")?,
        })
    }

    fn row_to_dependency(row: &sqlx::sqlite::SqliteRow) -> FleetResult<Dependency> {
        Ok(Dependency {
            id: row.try_get("id")?,
            job_task_id: row.try_get("job_task_id")?,
            parent_node_id: row.try_get("parent_node_id")?,
            child_node_id: row.try_get("child_node_id")?,
        })
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn add_node(&self, job_task_id: i64, task_id: i64) -> FleetResult<JobNode> {
        let result = sqlx::query("INSERT INTO job_nodes (job_task_id, task_id) VALUES (?, ?)")
            .bind(job_task_id)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        let node = JobNode {
            id: result.last_insert_rowid(),
            job_task_id,
            task_id,
        };
        debug!("作业 {} 添加节点 {} (任务 {})", job_task_id, node.id, task_id);
        Ok(node)
    }

    async fn add_dependency(&self, parent: &JobNode, child: &JobNode) -> FleetResult<Dependency> {
        if parent.job_task_id != child.job_task_id {
            return Err(FleetError::InvalidTaskParams(format!(
                "节点 {} 与 {} 不属于同一个作业",
                parent.id, child.id
            )));
        }
        if parent.id == child.id {
            return Err(FleetError::InvalidTaskParams(format!(
                "节点 {} 不能依赖自身",
                parent.id
            )));
        }

        let result = sqlx::query(
            "INSERT INTO job_dependencies (job_task_id, parent_node_id, child_node_id) VALUES (?, ?, ?)",
        )
        .bind(parent.job_task_id)
        .bind(parent.id)
        .bind(child.id)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        Ok(Dependency {
            id: result.last_insert_rowid(),
            job_task_id: parent.job_task_id,
            parent_node_id: parent.id,
            child_node_id: child.id,
        })
    }

    async fn get_node(&self, id: i64) -> FleetResult<Option<JobNode>> {
        let row = sqlx::query("SELECT id, job_task_id, task_id FROM job_nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        row.as_ref().map(Self::row_to_node).transpose()
    }

    async fn list_nodes(&self, job_task_id: i64) -> FleetResult<Vec<JobNode>> {
        let rows = sqlx::query(
            "SELECT id, job_task_id, task_id FROM job_nodes WHERE job_task_id = ? ORDER BY id",
        )
        .bind(job_task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        rows.iter().map(Self::row_to_node).collect()
    }

    async fn list_dependencies(&self, job_task_id: i64) -> FleetResult<Vec<Dependency>> {
        let rows = sqlx::query(
            "SELECT id, job_task_id, parent_node_id, child_node_id FROM job_dependencies WHERE job_task_id = ? ORDER BY id",
        )
        .bind(job_task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        rows.iter().map(Self::row_to_dependency).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;
    use taskfleet_core::root_nodes;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_build_graph() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        let a = repo.add_node(1, 10).await.unwrap();
        let b = repo.add_node(1, 11).await.unwrap();
        let c = repo.add_node(1, 12).await.unwrap();
        repo.add_dependency(&a, &b).await.unwrap();
        repo.add_dependency(&a, &c).await.unwrap();

        let nodes = repo.list_nodes(1).await.unwrap();
        let deps = repo.list_dependencies(1).await.unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(deps.len(), 2);
        let roots = root_nodes(&nodes, &deps);
        assert_eq!(roots, vec![&a]);

        assert_eq!(repo.get_node(b.id).await.unwrap(), Some(b.clone()));
        // 重复的边违反唯一约束
        assert!(repo.add_dependency(&a, &b).await.is_err());
    }

    #[tokio::test]
    async fn test_dependency_must_stay_within_job() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        let a = repo.add_node(1, 10).await.unwrap();
        let other = repo.add_node(2, 10).await.unwrap();
        assert!(repo.add_dependency(&a, &other).await.is_err());
        assert!(repo.add_dependency(&a, &a).await.is_err());
        assert!(repo.list_dependencies(1).await.unwrap().is_empty());
    }
}
