//! 设置加载器实现
//!
//! 提供TOML设置文件解析、环境变量替换和错误处理功能

use crate::error::{Result, SettingsError};
use crate::settings::types::{validate_settings, ShimSettings};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};

/// 设置文件名
pub const SETTINGS_FILE_NAME: &str = "settings.toml";

/// 当前目录下的设置文件名
pub const LOCAL_SETTINGS_FILE_NAME: &str = "modshim.toml";

/// 设置加载器trait，定义设置加载接口
#[async_trait]
pub trait SettingsLoader: Send + Sync {
    /// 从文件加载设置
    ///
    /// # 参数
    /// * `path` - 设置文件路径
    ///
    /// # 返回
    /// * `Result<ShimSettings>` - 加载的设置或错误
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<ShimSettings>;

    /// 从字符串加载设置
    async fn load_from_string(&self, content: &str) -> Result<ShimSettings>;

    /// 验证设置
    fn validate(&self, settings: &ShimSettings) -> Result<()>;
}

/// TOML设置加载器实现
#[derive(Debug, Clone)]
pub struct TomlSettingsLoader {
    /// 是否启用环境变量替换
    enable_env_substitution: bool,
}

impl TomlSettingsLoader {
    /// # 参数
    /// * `enable_env_substitution` - 是否启用环境变量替换
    pub fn new(enable_env_substitution: bool) -> Self {
        Self {
            enable_env_substitution,
        }
    }

    /// 替换字符串中的 `${VAR_NAME}` 环境变量
    fn substitute_env_vars(&self, content: &str) -> Result<String> {
        if !self.enable_env_substitution {
            return Ok(content.to_string());
        }

        let env_var_regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| SettingsError::ParseError(format!("正则表达式错误: {}", e)))?;

        let mut result = content.to_string();
        for captures in env_var_regex.captures_iter(content) {
            let full_match = &captures[0];
            let var_name = &captures[1];

            let value = std::env::var(var_name).map_err(|_| SettingsError::EnvVarError {
                var: var_name.to_string(),
            })?;
            result = result.replace(full_match, &value);
        }

        Ok(result)
    }

    fn parse_toml(&self, content: &str) -> Result<ShimSettings> {
        let processed_content = self.substitute_env_vars(content)?;

        let settings: ShimSettings = toml::from_str(&processed_content)
            .map_err(|e| SettingsError::ParseError(format!("TOML解析失败: {}", e)))?;

        Ok(settings)
    }
}

impl Default for TomlSettingsLoader {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl SettingsLoader for TomlSettingsLoader {
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<ShimSettings> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(SettingsError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            }
            .into());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SettingsError::ParseError(format!("读取文件失败: {}", e)))?;

        let settings = self.parse_toml(&content)?;
        self.validate(&settings)?;

        log::info!("成功加载设置文件: {}", path.display());
        log::debug!("设置内容: {:?}", settings);

        Ok(settings)
    }

    async fn load_from_string(&self, content: &str) -> Result<ShimSettings> {
        let settings = self.parse_toml(content)?;
        self.validate(&settings)?;

        log::debug!("成功解析设置字符串");

        Ok(settings)
    }

    fn validate(&self, settings: &ShimSettings) -> Result<()> {
        validate_settings(settings).map_err(|e| SettingsError::ValidationError(e).into())
    }
}

/// 获取默认设置文件路径
///
/// 当前目录存在 `modshim.toml` 时优先使用，否则使用用户配置目录下的 `modshim/settings.toml`
pub fn get_default_settings_path() -> PathBuf {
    let local = Path::new(LOCAL_SETTINGS_FILE_NAME);
    if local.exists() {
        return local.to_path_buf();
    }

    dirs::config_dir()
        .map(|config_dir| config_dir.join(crate::APP_NAME).join(SETTINGS_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(LOCAL_SETTINGS_FILE_NAME))
}

/// 加载设置
///
/// 显式指定的文件必须存在；未指定且默认位置没有文件时使用默认设置。
pub async fn load_settings(path: Option<&Path>) -> Result<ShimSettings> {
    let loader = TomlSettingsLoader::default();
    match path {
        Some(path) => loader.load_from_file(path).await,
        None => {
            let default_path = get_default_settings_path();
            if default_path.exists() {
                loader.load_from_file(default_path).await
            } else {
                log::debug!("未找到设置文件，使用默认设置");
                Ok(ShimSettings::default())
            }
        }
    }
}
