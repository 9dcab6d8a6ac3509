//! 日志：实体日志文件布局与结构化生命周期事件

pub mod log_paths;
pub mod structured_logger;

pub use log_paths::LogPaths;
pub use structured_logger::StructuredLogger;
