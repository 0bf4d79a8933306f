//! 插件配置子系统
//!
//! 带版本、可观察的插件配置：键定义、配置定义与构建器、运行时配置节、
//! 版本协调策略以及三级变更通知。

pub mod definition;
pub mod events;
pub mod key;
pub mod section;
pub mod value;
pub mod version;

// 重新导出主要类型
pub use definition::{AnnotatedField, ConfigurationDefinition, ConfigurationDefinitionBuilder};
pub use events::{any_configuration_changed, ConfigurationChangedEvent, SubscriptionId, Subscribers};
pub use key::{ConfigKey, ConfigKeyDefinition, ConfigKeyRange, ConfigKeyRef, TypedConfigKey};
pub use section::{
    ConfigurationSection, LoadFailure, LoadOutcome, LoadState, SectionContext, DEFAULT_SECTION,
};
pub use value::{ConfigValue, ValueKind};
pub use version::{
    reconcile, ConfigVersion, IncompatibleConfigurationHandling, IncompatibleVersionPolicy,
    Reconciliation,
};
