//! 错误处理模块
//!
//! 定义兼容层的统一错误类型

use std::path::PathBuf;
use thiserror::Error;

/// modshim 的主要错误类型
#[derive(Error, Debug)]
pub enum ShimError {
    /// 插件配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 持久化存储错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),

    /// 兼容层自身设置错误
    #[error("设置错误: {0}")]
    Settings(#[from] SettingsError),

    /// 插件生命周期错误
    #[error("插件 {plugin} 生命周期错误: {reason}")]
    Lifecycle { plugin: String, reason: String },

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 插件配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置键未在定义中注册
    #[error("配置键不存在: {key}")]
    KeyNotFound { key: String },

    /// 值未通过校验器或范围检查
    #[error("配置键 {key} 的值无效: {value}")]
    InvalidValue { key: String, value: String },

    /// 值类型与定义不一致
    #[error("配置键 {key} 类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// 持久化文档版本与定义版本不一致
    #[error("配置版本不兼容: 文件版本 {serialized}, 定义版本 {defined}")]
    IncompatibleVersion { serialized: String, defined: String },

    /// 文档格式错误（与版本无关的加载失败）
    #[error("配置 {identity} 加载失败: {reason}")]
    Malformed { identity: String, reason: String },

    /// 保存被拒绝
    #[error("配置 {identity} 拒绝保存: {reason}")]
    SaveRejected { identity: String, reason: String },

    /// 同一个键被绑定到多个配置节
    #[error("配置键 {key} 已属于另一个配置")]
    KeyAlreadyBound { key: String },

    /// 版本号格式错误
    #[error("无效的版本号: {0}")]
    InvalidVersion(String),

    /// 底层存储错误
    #[error("存储失败: {0}")]
    Store(#[from] StoreError),
}

/// 持久化存储错误类型
#[derive(Error, Debug)]
pub enum StoreError {
    /// 文件读写失败
    #[error("文件访问失败 {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 文档解析失败
    #[error("文档解析失败 {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    /// 文档序列化失败
    #[error("文档序列化失败: {reason}")]
    Serialize { reason: String },

    /// 防抖存储需要 tokio 运行时
    #[error("当前线程没有可用的 tokio 运行时")]
    NoRuntime,
}

/// 兼容层设置错误类型
#[derive(Error, Debug)]
pub enum SettingsError {
    /// 设置文件解析错误
    #[error("设置文件解析失败: {0}")]
    ParseError(String),

    /// 设置验证错误
    #[error("设置验证失败: {0}")]
    ValidationError(String),

    /// 设置文件不存在
    #[error("设置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 一次事件分发中订阅者失败的汇总
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} 个 {scope} 事件订阅者失败: {}", .failures.len(), .failures.join("; "))]
pub struct SubscriberFault {
    /// 事件范围，例如 `key:volume`、`configuration`
    pub scope: String,
    /// 每个失败订阅者的错误描述
    pub failures: Vec<String>,
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ShimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts_into_shim_error() {
        let err: ShimError = ConfigError::KeyNotFound {
            key: "volume".to_string(),
        }
        .into();
        assert!(err.to_string().contains("volume"));
    }

    #[test]
    fn test_subscriber_fault_display() {
        let fault = SubscriberFault {
            scope: "configuration".to_string(),
            failures: vec!["boom".to_string(), "panic".to_string()],
        };
        let text = fault.to_string();
        assert!(text.contains("2 个"));
        assert!(text.contains("boom; panic"));
        assert_eq!(text, "2 个 configuration 事件订阅者失败: boom; panic");

        let error: &dyn std::error::Error = &fault;
        assert!(error.source().is_none());
    }
}
