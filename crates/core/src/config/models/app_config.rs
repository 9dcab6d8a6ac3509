use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    daemon::{DaemonConfig, ExecutorConfig, SchedulerConfig},
    database::DatabaseConfig,
    observability::{LoggingConfig, ObservabilityConfig},
};

/// 默认配置文件搜索路径
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/taskfleet.toml",
    "taskfleet.toml",
    "/etc/taskfleet/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub daemon: DaemonConfig,
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
    pub logging: LoggingConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Built-in defaults
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (`TASKFLEET_<SECTION>__<KEY>`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        // 环境变量优先级最高，例如 TASKFLEET_EXECUTOR__CONCURRENT=8
        builder = builder.add_source(
            Environment::with_prefix("TASKFLEET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.daemon.validate().context("守护进程配置验证失败")?;
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.executor.validate().context("执行器配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.daemon.heartbeat_interval_seconds, 3);
        assert_eq!(config.daemon.heartbeat_failure_seconds, 12);
        assert_eq!(config.scheduler.max_claim_batch, 500);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [executor]
            queue = "reports"
            concurrent = 2
            backup_dir = "/var/backup/taskfleet"
            "#,
        )
        .unwrap();
        assert_eq!(config.executor.queue, "reports");
        assert_eq!(config.executor.concurrent, 2);
        assert_eq!(config.executor.log_dir, "logs");
        assert_eq!(config.database.url, "sqlite:taskfleet.db");
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.executor.concurrent, config.executor.concurrent);
        assert_eq!(parsed.logging.format, config.logging.format);
    }

    #[test]
    fn test_invalid_sections_are_rejected() {
        assert!(AppConfig::from_toml("[executor]\nconcurrent = 0").is_err());
        assert!(AppConfig::from_toml("[database]\nurl = \"postgres://x\"").is_err());
        assert!(AppConfig::from_toml(
            "[daemon]\nheartbeat_interval_seconds = 10\nheartbeat_failure_seconds = 5"
        )
        .is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[scheduler]\nmax_claim_batch = 25").unwrap();
        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.scheduler.max_claim_batch, 25);

        assert!(AppConfig::load(Some("/nonexistent/taskfleet.toml")).is_err());
    }
}
