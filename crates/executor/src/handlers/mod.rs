//! 内置任务处理器

pub mod job;
pub mod shell;

use std::sync::Arc;

use taskfleet_core::{ExecutorConfig, TaskRegistry};

pub use job::{advance_dependents, JobHandler};
pub use shell::ShellHandler;

/// 进程启动时构建的内置处理器注册表
pub fn builtin_registry(config: &ExecutorConfig) -> TaskRegistry {
    TaskRegistry::new()
        .with_handler(Arc::new(ShellHandler))
        .with_handler(Arc::new(JobHandler::new(config.job_poll_interval())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_kinds() {
        let registry = builtin_registry(&ExecutorConfig::default());
        assert_eq!(registry.kinds(), vec!["job".to_string(), "shell".to_string()]);
    }
}
