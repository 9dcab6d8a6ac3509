use std::path::{Path, PathBuf};

use async_trait::async_trait;
use taskfleet_core::Backup;
use tracing::{debug, warn};

/// 把实例日志复制到本地备份目录
pub struct LocalBackup {
    dir: PathBuf,
}

impl LocalBackup {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Backup for LocalBackup {
    async fn backup(&self, log_path: &Path) -> bool {
        let Some(file_name) = log_path.file_name() else {
            warn!("日志路径没有文件名，跳过备份: {}", log_path.display());
            return false;
        };
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!("创建备份目录 {} 失败: {}", self.dir.display(), e);
            return false;
        }

        let target = self.dir.join(file_name);
        match tokio::fs::copy(log_path, &target).await {
            Ok(bytes) => {
                debug!("日志已备份: {} -> {} ({} 字节)", log_path.display(), target.display(), bytes);
                true
            }
            Err(e) => {
                warn!("备份日志 {} 失败: {}", log_path.display(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backup_copies_log() {
        let logs = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        let log = logs.path().join("instance-3.log");
        tokio::fs::write(&log, b"done\n").await.unwrap();

        let backup = LocalBackup::new(backups.path().join("nested"));
        assert!(backup.backup(&log).await);
        let copied = tokio::fs::read(backup.dir().join("instance-3.log"))
            .await
            .unwrap();
        assert_eq!(copied, b"done\n");
    }

    #[tokio::test]
    async fn test_missing_log_is_reported() {
        let backups = tempfile::tempdir().unwrap();
        let backup = LocalBackup::new(backups.path());
        assert!(!backup.backup(Path::new("/nonexistent/instance-1.log")).await);
    }
}
