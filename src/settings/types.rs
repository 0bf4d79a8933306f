//! 兼容层设置数据结构
//!
//! 定义兼容层自身的设置结构体和验证逻辑

use crate::logging::parse_level;
use crate::store::DocumentFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 兼容层设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShimSettings {
    /// 插件配置文档所在目录
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
    /// 配置文档格式
    #[serde(default)]
    pub document_format: DocumentFormat,
    /// 保存防抖间隔（毫秒），0 表示立即写入
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,
    /// 日志设置
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// 日志设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json: bool,
    /// 日志文件路径
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// 默认值函数
fn default_save_debounce_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ShimSettings {
    fn default() -> Self {
        Self {
            config_dir: None,
            document_format: DocumentFormat::default(),
            save_debounce_ms: default_save_debounce_ms(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

impl ShimSettings {
    /// 实际使用的配置目录
    pub fn resolved_config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .map(|dir| dir.join(crate::APP_NAME).join("configs"))
                .unwrap_or_else(|| PathBuf::from("configs"))
        })
    }

    /// 防抖间隔，关闭时返回 `None`
    pub fn save_debounce(&self) -> Option<Duration> {
        (self.save_debounce_ms > 0).then(|| Duration::from_millis(self.save_debounce_ms))
    }
}

/// 设置验证函数
///
/// # 参数
/// * `settings` - 要验证的设置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_settings(settings: &ShimSettings) -> Result<(), String> {
    if parse_level(&settings.logging.level).is_none() {
        return Err(format!(
            "无效的日志级别: {}，支持的级别: [\"trace\", \"debug\", \"info\", \"warn\", \"error\", \"off\"]",
            settings.logging.level
        ));
    }

    if let Some(dir) = &settings.config_dir {
        if dir.as_os_str().is_empty() {
            return Err("配置目录不能为空".to_string());
        }
    }

    if settings.save_debounce_ms > 60_000 {
        return Err("保存防抖间隔不能超过60000毫秒".to_string());
    }

    Ok(())
}
