//! 调度器守护进程
//!
//! 认领固定周期与 CRON 调度，把每次触发登记到进程内的 [`RecurringTimer`]，
//! 到期时为调度的任务创建实例并推入调度指定的队列。

pub mod scheduler;
pub mod timer;

pub use scheduler::Scheduler;
pub use timer::{callback, FireAt, RecurringTimer, TimerCallback};
