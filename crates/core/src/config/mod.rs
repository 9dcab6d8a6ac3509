//! 配置管理
//!
//! 加载顺序：内置默认值 → TOML 配置文件 → `TASKFLEET_` 前缀的环境变量。

pub mod models;

pub use models::*;
