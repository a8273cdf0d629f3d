//! Nacos Property Source 主程序入口
//!
//! 读取、发布、删除远程配置，或加载属性源并跟踪远程变更

use anyhow::{Context, Result};
use clap::Parser;
use nacos_property_source::cli::args::{Args, Commands};
use nacos_property_source::cli::commands::{
    Command, GetCommand, PublishCommand, RemoveCommand, ValidateCommand, VersionCommand,
    WatchCommand,
};
use nacos_property_source::logging::{LogConfig, LoggingSystem};
use tracing::{debug, error};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 初始化日志系统，写文件时不再输出到控制台
    let log_config = LogConfig {
        level: args.log_level.clone().into(),
        console: args.log_file.is_none(),
        json_format: args.json_logs,
        file_path: args.log_file.clone(),
        ..Default::default()
    };

    let logging_system = LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    debug!(
        "{} v{} 启动",
        nacos_property_source::APP_NAME,
        nacos_property_source::VERSION
    );

    // 执行命令
    if let Err(e) = execute_command(&args, logging_system).await {
        error!("命令执行失败: {}", e);
        eprintln!("错误: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

/// 执行CLI命令
async fn execute_command(args: &Args, logging_system: LoggingSystem) -> Result<()> {
    let command: Box<dyn Command> = match &args.command {
        Commands::Get { .. } => Box::new(GetCommand),
        Commands::Publish { .. } => Box::new(PublishCommand::new(logging_system)),
        Commands::Remove { .. } => Box::new(RemoveCommand::new(logging_system)),
        Commands::Watch { .. } => Box::new(WatchCommand::new(logging_system)),
        Commands::Validate { .. } => Box::new(ValidateCommand),
        Commands::Version { .. } => Box::new(VersionCommand),
    };

    command.execute(args).await.map_err(|e| anyhow::anyhow!(e))
}
