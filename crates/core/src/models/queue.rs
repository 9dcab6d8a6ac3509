use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 队列类型标签：存储队列
pub const DB_QUEUE_KIND: &str = "db";
/// 队列类型标签：按优先级组合的队列组
pub const QUEUE_GROUP_KIND: &str = "group";

/// 队列记录
///
/// 队列组的 `members` 按优先级从高到低排列。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl QueueRecord {
    pub fn db(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            kind: DB_QUEUE_KIND.to_string(),
            members: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn group(name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            kind: QUEUE_GROUP_KIND.to_string(),
            members,
            created_at: Utc::now(),
        }
    }
}
