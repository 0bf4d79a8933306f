//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use crate::config::IncompatibleConfigurationHandling;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// modshim - 旧版插件兼容层
#[derive(Parser, Debug, Clone)]
#[command(
    name = "modshim",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 设置文件路径
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "设置文件路径",
        env = "MODSHIM_SETTINGS"
    )]
    pub settings: Option<PathBuf>,

    /// 日志级别，覆盖设置文件中的值
    #[arg(
        short,
        long,
        value_enum,
        help = "日志级别",
        env = "MODSHIM_LOG_LEVEL"
    )]
    pub log_level: Option<LogLevel>,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

/// 日志级别枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    /// 跟踪级别
    Trace,
    /// 调试级别
    Debug,
    /// 信息级别
    Info,
    /// 警告级别
    Warn,
    /// 错误级别
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 查看已保存的配置文档
    Inspect {
        /// 文档路径
        #[arg(value_name = "FILE", help = "配置文档路径")]
        file: PathBuf,

        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },

    /// 检查文档与指定定义版本的协调结果
    Check {
        /// 文档路径
        #[arg(value_name = "FILE", help = "配置文档路径")]
        file: PathBuf,

        /// 定义版本
        #[arg(short, long, value_name = "VERSION", help = "配置定义版本，例如 2.0.0")]
        expect: String,

        /// 不兼容版本处理策略
        #[arg(short, long, value_enum, default_value = "error", help = "不兼容版本处理策略")]
        policy: PolicyArg,

        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },

    /// 显示生效的设置
    Settings {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },

    /// 显示版本信息
    Version {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },
}

/// 输出格式枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum OutputFormat {
    /// 文本格式
    Text,
    /// JSON格式
    Json,
}

/// 不兼容版本处理策略
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum PolicyArg {
    /// 加载失败
    Error,
    /// 丢弃已保存的值
    Clobber,
    /// 忽略版本强行加载
    ForceLoad,
}

impl From<PolicyArg> for IncompatibleConfigurationHandling {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Error => IncompatibleConfigurationHandling::Error,
            PolicyArg::Clobber => IncompatibleConfigurationHandling::Clobber,
            PolicyArg::ForceLoad => IncompatibleConfigurationHandling::ForceLoad,
        }
    }
}

impl Args {
    /// 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// 设置文件路径；未指定时返回 `None`，由加载器决定默认位置
    pub fn settings_path(&self) -> Option<&std::path::Path> {
        self.settings.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check_command() {
        let args = Args::parse_from([
            "modshim",
            "--log-level",
            "debug",
            "check",
            "doc.json",
            "--expect",
            "2.0.0",
            "--policy",
            "force-load",
        ]);

        assert_eq!(args.log_level, Some(LogLevel::Debug));
        match args.command {
            Commands::Check {
                file,
                expect,
                policy,
                format,
            } => {
                assert_eq!(file, PathBuf::from("doc.json"));
                assert_eq!(expect, "2.0.0");
                assert_eq!(policy, PolicyArg::ForceLoad);
                assert_eq!(format, OutputFormat::Text);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_policy_conversion() {
        assert_eq!(
            IncompatibleConfigurationHandling::from(PolicyArg::Clobber),
            IncompatibleConfigurationHandling::Clobber
        );
        assert_eq!(log::LevelFilter::from(LogLevel::Trace), log::LevelFilter::Trace);
    }
}
