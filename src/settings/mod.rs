//! 兼容层自身的设置
//!
//! 提供设置文件解析、环境变量替换和验证

pub mod loader;
pub mod types;

// 重新导出主要类型
pub use loader::{get_default_settings_path, load_settings, SettingsLoader, TomlSettingsLoader};
pub use types::{validate_settings, LoggingSettings, ShimSettings};
