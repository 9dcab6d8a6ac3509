//! 队列注册表
//!
//! 队列以记录形式保存（名称、类型标签、成员列表）。注册表把类型标签映射到加载器，
//! 在进程启动时构建，并作为参数传给调度器和执行器。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{FleetError, FleetResult};
use crate::models::QueueRecord;
use crate::traits::{Queue, QueueRepository};

/// 队列组嵌套的最大深度，超过即视为循环引用
const MAX_QUEUE_DEPTH: usize = 8;

/// 把一条队列记录加载为可用的队列
#[async_trait]
pub trait QueueLoader: Send + Sync {
    async fn load(
        &self,
        record: &QueueRecord,
        registry: &QueueRegistry,
        depth: usize,
    ) -> FleetResult<Arc<dyn Queue>>;
}

pub struct QueueRegistry {
    repository: Arc<dyn QueueRepository>,
    loaders: HashMap<String, Arc<dyn QueueLoader>>,
}

impl QueueRegistry {
    pub fn new(repository: Arc<dyn QueueRepository>) -> Self {
        Self {
            repository,
            loaders: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: impl Into<String>, loader: Arc<dyn QueueLoader>) {
        self.loaders.insert(kind.into(), loader);
    }

    pub fn with_loader(mut self, kind: impl Into<String>, loader: Arc<dyn QueueLoader>) -> Self {
        self.register(kind, loader);
        self
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.loaders.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn repository(&self) -> &Arc<dyn QueueRepository> {
        &self.repository
    }

    pub async fn resolve(&self, name: &str) -> FleetResult<Arc<dyn Queue>> {
        self.resolve_at_depth(name, 0).await
    }

    /// 解析队列组成员时使用，depth 随嵌套层级递增
    pub async fn resolve_at_depth(&self, name: &str, depth: usize) -> FleetResult<Arc<dyn Queue>> {
        if depth > MAX_QUEUE_DEPTH {
            return Err(FleetError::Configuration(format!(
                "队列 {name} 嵌套层级超过 {MAX_QUEUE_DEPTH}，可能存在循环引用"
            )));
        }
        let record = self
            .repository
            .get_by_name(name)
            .await?
            .ok_or_else(|| FleetError::QueueNotFound {
                name: name.to_string(),
            })?;
        let loader = self
            .loaders
            .get(&record.kind)
            .ok_or_else(|| FleetError::UnknownQueueKind {
                kind: record.kind.clone(),
            })?;
        loader.load(&record, self, depth).await
    }
}
