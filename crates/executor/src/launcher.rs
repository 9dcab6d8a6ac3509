use std::path::PathBuf;
use std::process::Stdio;

use taskfleet_core::{FleetError, FleetResult, Instance, LogPaths};
use tokio::process::{Child, Command};
use tracing::debug;

/// 为任务实例启动子进程
pub trait InstanceLauncher: Send + Sync {
    fn launch(&self, instance: &Instance) -> FleetResult<Child>;
}

/// 以 `<program> [base_args] run-instance --instance-id <id>` 启动子进程，
/// 标准输出与标准错误追加到实例日志文件
pub struct ProcessLauncher {
    program: PathBuf,
    base_args: Vec<String>,
    log_paths: LogPaths,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, log_paths: LogPaths) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            log_paths,
        }
    }

    /// 使用当前可执行文件
    pub fn current_exe(log_paths: LogPaths) -> FleetResult<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, log_paths))
    }

    /// 放在子命令之前的参数，例如 `--config <path>`
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl InstanceLauncher for ProcessLauncher {
    fn launch(&self, instance: &Instance) -> FleetResult<Child> {
        let log_path = self.log_paths.instance_log(instance.id);
        let stdout = LogPaths::open_append(&log_path)?;
        let stderr = stdout.try_clone()?;

        let child = Command::new(&self.program)
            .args(&self.base_args)
            .arg("run-instance")
            .arg("--instance-id")
            .arg(instance.id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| FleetError::Process(format!("启动任务实例子进程失败: {e}")))?;

        debug!(
            instance.id = instance.id,
            process.pid = child.id(),
            log = %log_path.display(),
            "任务实例子进程已启动"
        );
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskfleet_core::Task;

    #[tokio::test]
    async fn test_child_output_goes_to_instance_log() {
        let dir = tempfile::tempdir().unwrap();
        let paths = LogPaths::new(dir.path());
        let launcher =
            ProcessLauncher::new("sh", paths.clone()).with_args(["-c", "echo \"$@\"", "launcher"]);

        let mut instance = Instance::new(&Task::new("t", "shell", json!({})));
        instance.id = 17;
        let mut child = launcher.launch(&instance).unwrap();
        assert!(child.wait().await.unwrap().success());

        let content = std::fs::read_to_string(paths.instance_log(17)).unwrap();
        assert_eq!(content, "run-instance --instance-id 17\n");
    }

    #[test]
    fn test_missing_program_is_a_process_error() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new("/nonexistent/taskfleet", LogPaths::new(dir.path()));
        let instance = Instance::new(&Task::new("t", "shell", json!({})));
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        assert!(matches!(
            launcher.launch(&instance),
            Err(FleetError::Process(_))
        ));
    }
}
