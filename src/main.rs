//! modshim 主程序入口
//!
//! 旧版插件兼容层的检查工具

use anyhow::{Context, Result};
use clap::Parser;
use modshim::cli::args::{Args, Commands};
use modshim::cli::commands::{
    CheckCommand, Command, InspectCommand, SettingsCommand, VersionCommand,
};
use modshim::logging::{parse_level, LogConfig, LoggingSystem};
use modshim::settings::{load_settings, ShimSettings};
use tracing::{debug, error};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 加载设置
    let settings = load_settings(args.settings_path())
        .await
        .context("加载设置失败")?;

    // 初始化日志系统，命令行级别优先
    let level = args
        .log_level
        .map(Into::into)
        .or_else(|| parse_level(&settings.logging.level))
        .unwrap_or(log::LevelFilter::Info);
    let log_config = LogConfig {
        level,
        file_path: settings.logging.file.clone(),
        console: settings.logging.file.is_none(),
        json_format: settings.logging.json,
        ..Default::default()
    };

    let _logging_system = LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    debug!("{} v{} 启动", modshim::APP_NAME, modshim::VERSION);

    // 执行命令
    if let Err(e) = execute_command(&args, settings).await {
        error!("命令执行失败: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// 执行CLI命令
async fn execute_command(args: &Args, settings: ShimSettings) -> Result<()> {
    let command: Box<dyn Command> = match &args.command {
        Commands::Inspect { .. } => Box::new(InspectCommand),
        Commands::Check { .. } => Box::new(CheckCommand),
        Commands::Settings { .. } => Box::new(SettingsCommand::new(settings)),
        Commands::Version { .. } => Box::new(VersionCommand),
    };

    command.execute(args).await.map_err(|e| anyhow::anyhow!(e))
}
