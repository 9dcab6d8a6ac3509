//! 重复规则计算：固定周期与 CRON 风格编码

pub mod cron;
pub mod interval;

pub use cron::{canonicalize, CronField, CronFields, CronPreset};
pub use interval::advance_interval;
