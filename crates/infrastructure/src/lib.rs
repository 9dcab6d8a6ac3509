//! 共享存储与外部协作者的实现：SQLite 仓储、存储队列、指标与日志备份

pub mod backup;
pub mod database;
pub mod observability;
pub mod queue;

pub use backup::LocalBackup;
pub use database::*;
pub use observability::*;
pub use queue::*;
