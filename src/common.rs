use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use taskfleet_core::{LogPaths, LoggingConfig, ObservabilityConfig};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn format_layer<W>(format: &str, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}

/// 初始化日志系统
///
/// 输出到标准输出；给出 `log_file` 时同时追加写入该文件（守护进程的实体日志）。
/// `RUST_LOG` 优先于配置中的级别。
pub fn init_logging(config: &LoggingConfig, log_file: Option<&Path>) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let ansi = std::io::stdout().is_terminal();
    let mut layers: Vec<BoxedLayer> = vec![format_layer(&config.format, std::io::stdout, ansi)];
    if let Some(path) = log_file {
        let file = LogPaths::open_append(path)
            .with_context(|| format!("打开日志文件失败: {}", path.display()))?;
        layers.push(format_layer(&config.format, Arc::new(file), false));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("初始化日志系统失败")?;
    Ok(())
}

/// 按配置安装 Prometheus 指标导出器
pub fn start_metrics(config: &ObservabilityConfig) -> Result<()> {
    if config.metrics_enabled {
        taskfleet_infrastructure::install_prometheus(&config.metrics_bind_address)?;
    }
    Ok(())
}
