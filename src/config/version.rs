//! 配置版本与不兼容版本处理策略

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 配置定义的语义版本号（major.minor.patch）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConfigVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ConfigVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Default for ConfigVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ConfigVersion {
    type Err = ConfigError;

    /// 接受 `major.minor` 或 `major.minor.patch`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(ConfigError::InvalidVersion(s.to_string()));
        }

        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| ConfigError::InvalidVersion(s.to_string()))?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}

impl TryFrom<String> for ConfigVersion {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConfigVersion> for String {
    fn from(value: ConfigVersion) -> Self {
        value.to_string()
    }
}

/// 持久化版本与定义版本不一致时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncompatibleConfigurationHandling {
    /// 加载失败，并阻止覆盖磁盘上的文件
    #[default]
    Error,
    /// 丢弃已保存的内容，从默认值重新开始
    Clobber,
    /// 忽略版本号，强行加载
    ForceLoad,
}

impl fmt::Display for IncompatibleConfigurationHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Clobber => "clobber",
            Self::ForceLoad => "force-load",
        };
        f.write_str(name)
    }
}

/// 决定如何处理不兼容版本的一方，通常是拥有该配置的插件
pub trait IncompatibleVersionPolicy: Send + Sync {
    /// # 参数
    /// * `serialized` - 从文档读出的版本
    /// * `defined` - 插件代码中定义的版本
    fn handle_incompatible_versions(
        &self,
        serialized: &ConfigVersion,
        defined: &ConfigVersion,
    ) -> IncompatibleConfigurationHandling;
}

impl IncompatibleVersionPolicy for IncompatibleConfigurationHandling {
    fn handle_incompatible_versions(
        &self,
        _serialized: &ConfigVersion,
        _defined: &ConfigVersion,
    ) -> IncompatibleConfigurationHandling {
        *self
    }
}

/// 读取到的文档版本与定义版本的协调结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// 版本一致，直接加载
    Compatible,
    /// 版本不一致，加载失败
    Reject,
    /// 版本不一致，丢弃文档内容
    Clobber,
    /// 版本不一致，忽略版本强行加载
    ForceLoad,
}

impl Reconciliation {
    /// 是否会读取文档中的值
    pub fn reads_document(self) -> bool {
        matches!(self, Self::Compatible | Self::ForceLoad)
    }
}

/// 比较版本，不一致时询问策略
pub fn reconcile(
    serialized: &ConfigVersion,
    defined: &ConfigVersion,
    policy: &dyn IncompatibleVersionPolicy,
) -> Reconciliation {
    if serialized == defined {
        return Reconciliation::Compatible;
    }

    match policy.handle_incompatible_versions(serialized, defined) {
        IncompatibleConfigurationHandling::Error => Reconciliation::Reject,
        IncompatibleConfigurationHandling::Clobber => Reconciliation::Clobber,
        IncompatibleConfigurationHandling::ForceLoad => Reconciliation::ForceLoad,
    }
}
