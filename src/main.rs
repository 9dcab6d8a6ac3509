use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use taskfleet_core::AppConfig;

mod app;
mod common;

use app::{AppMode, Application};

fn cli() -> Command {
    Command::new("taskfleet")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式任务调度与执行集群")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时按默认路径搜索")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"])
                .global(true),
        )
        .subcommand(Command::new("scheduler").about("运行调度器守护进程"))
        .subcommand(
            Command::new("executor")
                .about("运行执行器守护进程")
                .arg(
                    Arg::new("queue")
                        .short('q')
                        .long("queue")
                        .value_name("NAME")
                        .help("消费的队列名"),
                )
                .arg(
                    Arg::new("concurrent")
                        .short('n')
                        .long("concurrent")
                        .value_name("N")
                        .help("最大并发子进程数")
                        .value_parser(value_parser!(usize)),
                ),
        )
        .subcommand(
            Command::new("run-instance")
                .about("在当前进程中运行单个任务实例（由执行器启动）")
                .arg(
                    Arg::new("instance-id")
                        .long("instance-id")
                        .value_name("ID")
                        .required(true)
                        .value_parser(value_parser!(i64)),
                ),
        )
}

/// 命令行参数覆盖配置文件
fn apply_overrides(config: &mut AppConfig, matches: &ArgMatches) {
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.logging.format = format.clone();
    }
    if let Some(("executor", sub)) = matches.subcommand() {
        if let Some(queue) = sub.get_one::<String>("queue") {
            config.executor.queue = queue.clone();
        }
        if let Some(concurrent) = sub.get_one::<usize>("concurrent") {
            config.executor.concurrent = *concurrent;
        }
    }
}

fn parse_mode(matches: &ArgMatches) -> Result<AppMode> {
    match matches.subcommand() {
        Some(("scheduler", _)) => Ok(AppMode::Scheduler),
        Some(("executor", _)) => Ok(AppMode::Executor),
        Some(("run-instance", sub)) => {
            let instance_id = sub
                .get_one::<i64>("instance-id")
                .copied()
                .context("缺少 --instance-id")?;
            Ok(AppMode::RunInstance { instance_id })
        }
        Some((other, _)) => Err(anyhow::anyhow!("不支持的子命令: {other}")),
        None => Err(anyhow::anyhow!("缺少子命令")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config_path = matches.get_one::<String>("config").cloned();

    let mut config = AppConfig::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;
    apply_overrides(&mut config, &matches);
    config.validate()?;

    let mode = parse_mode(&matches)?;
    let app = Application::new(config, config_path).await?;
    app.run(mode).await
}
