//! 执行器守护进程与任务实例的运行
//!
//! 执行器从队列弹出实例，每个实例在独立的子进程中运行（`taskfleet run-instance`）。
//! 子进程内由 [`InstanceRunner`] 负责状态流转、超时与中断处理。

pub mod executor;
pub mod handlers;
pub mod launcher;
pub mod runner;

pub use executor::{Executor, ExecutorStats};
pub use handlers::{builtin_registry, JobHandler, ShellHandler};
pub use launcher::{InstanceLauncher, ProcessLauncher};
pub use runner::{termination_signal, InstanceRunner};
