use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use taskfleet_core::{FleetError, FleetResult, TaskContext, TaskHandler};
use tokio::process::Command;
use tracing::{info, warn};

/// `shell` 任务参数
#[derive(Debug, Deserialize)]
struct ShellParams {
    command: String,
    /// 超时或被中断后执行的收尾命令
    #[serde(default)]
    finalizer: Option<String>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    env: HashMap<String, String>,
}

impl ShellParams {
    fn parse(ctx: &TaskContext) -> FleetResult<Self> {
        serde_json::from_value(ctx.task.parameters.clone()).map_err(|e| {
            FleetError::InvalidTaskParams(format!("解析Shell任务参数失败: {e}"))
        })
    }

    fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script).envs(&self.env).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// 通过 `sh -c` 运行命令，退出码为 0 即成功
///
/// 子命令继承实例进程的标准输出，因此输出直接写入实例日志。
#[derive(Debug, Default)]
pub struct ShellHandler;

#[async_trait]
impl TaskHandler for ShellHandler {
    fn kind(&self) -> &str {
        "shell"
    }

    async fn run(&self, ctx: &TaskContext) -> FleetResult<bool> {
        let params = ShellParams::parse(ctx)?;
        info!(
            instance.id = ctx.instance.id,
            command = %params.command,
            "执行Shell任务"
        );

        let status = params
            .command(&params.command)
            .status()
            .await
            .map_err(|e| FleetError::TaskExecution(format!("启动Shell命令失败: {e}")))?;

        if !status.success() {
            warn!(
                instance.id = ctx.instance.id,
                exit_code = ?status.code(),
                "Shell命令以非零状态退出"
            );
        }
        Ok(status.success())
    }

    async fn finalize(&self, ctx: &TaskContext) -> FleetResult<()> {
        let params = ShellParams::parse(ctx)?;
        let Some(finalizer) = &params.finalizer else {
            return Ok(());
        };
        info!(instance.id = ctx.instance.id, command = %finalizer, "执行收尾命令");

        let status = params
            .command(finalizer)
            .status()
            .await
            .map_err(|e| FleetError::TaskExecution(format!("启动收尾命令失败: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(FleetError::TaskExecution(format!(
                "收尾命令退出码: {:?}",
                status.code()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskfleet_core::{Instance, Task};
    use taskfleet_infrastructure::DatabaseManager;

    async fn context(parameters: serde_json::Value) -> (DatabaseManager, TaskContext) {
        let manager = DatabaseManager::in_memory().await.unwrap();
        let task = Task::new("shell", "shell", parameters);
        let ctx = TaskContext {
            instance: Instance::new(&task),
            task,
            store: manager.store(),
        };
        (manager, ctx)
    }

    #[tokio::test]
    async fn test_exit_status_decides_success() {
        let (_m, ok) = context(json!({"command": "exit 0"})).await;
        assert!(ShellHandler.run(&ok).await.unwrap());

        let (_m, failed) = context(json!({"command": "exit 3"})).await;
        assert!(!ShellHandler.run(&failed).await.unwrap());
    }

    #[tokio::test]
    async fn test_env_and_working_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let (_m, ctx) = context(json!({
            "command": "test \"$GREETING\" = hello && test \"$(pwd -P)\" = \"$EXPECTED\"",
            "working_dir": dir.path(),
            "env": {
                "GREETING": "hello",
                "EXPECTED": dir.path().canonicalize().unwrap(),
            },
        }))
        .await;
        assert!(ShellHandler.run(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_command_is_invalid() {
        let (_m, ctx) = context(json!({"script": "true"})).await;
        assert!(matches!(
            ShellHandler.run(&ctx).await,
            Err(FleetError::InvalidTaskParams(_))
        ));
    }

    #[tokio::test]
    async fn test_finalizer_runs_when_declared() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finalized");
        let (_m, ctx) = context(json!({
            "command": "sleep 5",
            "finalizer": format!("touch {}", marker.display()),
        }))
        .await;
        ShellHandler.finalize(&ctx).await.unwrap();
        assert!(marker.exists());

        let (_m, without) = context(json!({"command": "true"})).await;
        ShellHandler.finalize(&without).await.unwrap();
    }
}
