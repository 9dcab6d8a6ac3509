//! 队列实现
//!
//! - `DbQueue` - 基于共享存储的先进先出队列
//! - `QueueGroup` - 按优先级组合多个队列，只能出队
//!
//! 两者都通过 [`taskfleet_core::QueueRegistry`] 按名称解析，加载器见 `loaders`。

pub mod db_queue;
pub mod loaders;
pub mod queue_group;

pub use db_queue::DbQueue;
pub use loaders::{DbQueueLoader, QueueGroupLoader};
pub use queue_group::QueueGroup;
