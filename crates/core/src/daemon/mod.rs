//! 守护进程生命周期
//!
//! 调度器和执行器都实现 [`Daemon`]，由 [`DaemonRuntime`] 负责：
//! 1. 检查记录处于 CREATED，调用 `can_start`
//! 2. 安装信号转发（SIGINT → STOP，SIGTERM → KILL）
//! 3. 标记 RUNNING，启动心跳任务
//! 4. 运行 `run()`，出错或 panic 时置为 ERROR，正常返回且非终态时置为 ENDED
//! 5. 停止心跳 → `clean_up()` → 记录结束时间
//!
//! 控制请求写在存储中的守护进程记录上，主循环每个周期读取一次，
//! 处理后只清除读到的那个请求。

pub mod context;
pub mod heartbeat;
pub mod runtime;
pub mod signals;

pub use context::DaemonContext;
pub use heartbeat::HeartbeatManager;
pub use runtime::{Daemon, DaemonRuntime};
pub use signals::forward_signals;
