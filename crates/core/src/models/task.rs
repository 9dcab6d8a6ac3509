use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务定义
///
/// `kind` 决定由哪个 [`crate::TaskHandler`] 执行，`parameters` 的结构由该处理器解释。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub kind: String,
    pub parameters: serde_json::Value,
    /// 墙钟超时（秒），为空表示不限制
    pub timeout_seconds: Option<i64>,
    /// 任务当前修订版本，创建实例时记录到实例上
    pub revision: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            id: 0, // 将由数据库生成
            name: name.into(),
            description: String::new(),
            kind: kind.into(),
            parameters,
            timeout_seconds: None,
            revision: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timeout(mut self, seconds: i64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.timeout_seconds
            .filter(|s| *s > 0)
            .map(|s| std::time::Duration::from_secs(s as u64))
    }

    /// 从参数中读取字符串字段
    pub fn string_param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}
