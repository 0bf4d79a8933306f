//! modshim - 旧版插件兼容层
//!
//! 让针对旧版 mod 加载器 API 编写的插件不经修改地运行在新宿主上，核心是：
//! - 带版本的插件配置与不兼容版本处理策略
//! - 带校验的配置读写与三级变更通知
//! - JSON/TOML 文档持久化与防抖写入
//! - 插件生命周期与启用开关
//! - 结构化日志记录

pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod settings;
pub mod store;

// 重新导出主要类型
pub use config::{
    ConfigKey, ConfigKeyDefinition, ConfigVersion, ConfigurationDefinition,
    ConfigurationDefinitionBuilder, ConfigurationSection, IncompatibleConfigurationHandling,
    TypedConfigKey,
};
pub use error::{ConfigError, ShimError};
pub use host::{LegacyMod, ModHost, ShimHost};
pub use settings::ShimSettings;

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
