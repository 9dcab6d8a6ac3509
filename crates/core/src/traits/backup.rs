use std::path::Path;

use async_trait::async_trait;

/// 日志备份协作者，尽力而为，失败只记录日志
#[async_trait]
pub trait Backup: Send + Sync {
    async fn backup(&self, log_path: &Path) -> bool;
}
