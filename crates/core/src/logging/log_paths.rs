use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::errors::FleetResult;
use crate::models::DaemonKind;

/// 每个守护进程与任务实例一个只追加的日志文件：
/// `<log_dir>/<实体类型>/<实体类型>-<id>.log`
#[derive(Debug, Clone)]
pub struct LogPaths {
    root: PathBuf,
}

impl LogPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entity_log(&self, entity: &str, id: i64) -> PathBuf {
        self.root.join(entity).join(format!("{entity}-{id}.log"))
    }

    pub fn daemon_log(&self, kind: DaemonKind, id: i64) -> PathBuf {
        self.entity_log(kind.entity_name(), id)
    }

    pub fn instance_log(&self, id: i64) -> PathBuf {
        self.entity_log("instance", id)
    }

    /// 以追加方式打开日志文件，必要时创建目录
    pub fn open_append(path: &Path) -> FleetResult<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(file)
    }
}
