//! 配置节：一个配置定义的运行时值存储
//!
//! 负责加载与版本协调、带校验的读写、保存，以及三级变更通知。
//! 值的修改只在内部锁内完成，通知在锁外同步分发，订阅者可以再次修改同一个键。

use crate::config::definition::ConfigurationDefinition;
use crate::config::events::{
    any_configuration_changed, fire_configuration_changed, ConfigurationChangedEvent,
    SubscriptionId, Subscribers,
};
use crate::config::key::{ConfigKey, ConfigKeyRef, DynValue, TypedConfigKey};
use crate::config::value::ConfigValue;
use crate::config::version::{reconcile, ConfigVersion, IncompatibleVersionPolicy, Reconciliation};
use crate::error::{ConfigError, StoreError};
use crate::logging::ModLogger;
use crate::store::{ConfigDocument, DocumentIdentity, DocumentStore};
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

/// 默认的配置节名
pub const DEFAULT_SECTION: &str = "config";

/// 加载失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    /// 版本不兼容且策略为 `Error`
    IncompatibleVersion {
        serialized: ConfigVersion,
        defined: ConfigVersion,
    },
    /// 文档无法读取或解析
    Malformed(String),
}

/// 加载状态
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loaded,
    Failed(LoadFailure),
}

impl LoadState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadState::Loaded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, LoadState::Failed(_))
    }
}

/// 成功加载的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// 没有已保存的文档，全部使用默认值
    Fresh,
    /// 版本一致，`rejected` 为未通过校验而回落到默认值的键数
    Loaded { rejected: usize },
    /// 版本不一致，丢弃了文档内容
    Clobbered { serialized: ConfigVersion },
    /// 版本不一致，忽略版本强行加载
    ForceLoaded {
        serialized: ConfigVersion,
        rejected: usize,
    },
}

/// 配置节的外部协作者
#[derive(Clone)]
pub struct SectionContext {
    /// 文档存储
    pub store: Arc<dyn DocumentStore>,
    /// 不兼容版本处理策略，通常来自所属插件
    pub policy: Arc<dyn IncompatibleVersionPolicy>,
    /// 所属插件的日志句柄
    pub logger: ModLogger,
    /// 配置节名，与所属插件一起组成文档标识
    pub section_id: String,
}

impl SectionContext {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        policy: Arc<dyn IncompatibleVersionPolicy>,
        logger: ModLogger,
    ) -> Self {
        Self {
            store,
            policy,
            logger,
            section_id: DEFAULT_SECTION.to_string(),
        }
    }

    pub fn with_section_id(mut self, section_id: impl Into<String>) -> Self {
        self.section_id = section_id.into();
        self
    }
}

struct SectionState {
    load_state: LoadState,
    persisted_version: Option<ConfigVersion>,
    values: HashMap<String, DynValue>,
    explicit: HashSet<String>,
}

/// 配置节
///
/// 每个插件配置只有一个实例，调用方可以在插件的整个生命周期内缓存它。
pub struct ConfigurationSection {
    this: Weak<ConfigurationSection>,
    definition: ConfigurationDefinition,
    identity: DocumentIdentity,
    store: Arc<dyn DocumentStore>,
    policy: Arc<dyn IncompatibleVersionPolicy>,
    logger: ModLogger,
    state: Mutex<SectionState>,
    on_this_changed: Subscribers<ConfigurationChangedEvent>,
}

impl ConfigurationSection {
    /// 创建配置节并把定义中的键绑定到它
    ///
    /// 新建的配置节处于 `Unloaded` 状态，所有键都是默认值。
    ///
    /// # 错误
    /// 某个键已绑定到另一个仍存活的配置节时返回 `KeyAlreadyBound`
    pub fn new(
        definition: ConfigurationDefinition,
        context: SectionContext,
    ) -> Result<Arc<Self>, ConfigError> {
        let identity = DocumentIdentity::new(definition.owner(), context.section_id);
        let values = default_values(&definition);

        let section = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            definition,
            identity,
            store: context.store,
            policy: context.policy,
            logger: context.logger,
            state: Mutex::new(SectionState {
                load_state: LoadState::Unloaded,
                persisted_version: None,
                values,
                explicit: HashSet::new(),
            }),
            on_this_changed: Subscribers::new(),
        });

        for key in section.definition.key_slice() {
            if !key.erased().bind(Arc::downgrade(&section)) {
                return Err(ConfigError::KeyAlreadyBound {
                    key: key.name().to_string(),
                });
            }
        }

        Ok(section)
    }

    pub fn definition(&self) -> &ConfigurationDefinition {
        &self.definition
    }

    pub fn identity(&self) -> &DocumentIdentity {
        &self.identity
    }

    pub fn logger(&self) -> &ModLogger {
        &self.logger
    }

    pub fn load_state(&self) -> LoadState {
        self.state.lock().load_state.clone()
    }

    /// 加载时从文档读到的版本，首次运行时为 `None`
    pub fn persisted_version(&self) -> Option<ConfigVersion> {
        self.state.lock().persisted_version
    }

    /// 从存储加载并按版本策略协调
    ///
    /// 失败后可以再次调用重试。加载不会触发变更通知。
    pub fn load(&self) -> Result<LoadOutcome, ConfigError> {
        let defined = self.definition.version();
        let document = match self.store.load(&self.identity) {
            Ok(document) => document,
            Err(e) => {
                let reason = e.to_string();
                self.logger
                    .error(|| format!("读取配置 {} 失败: {}", self.identity, reason));
                self.reset(LoadState::Failed(LoadFailure::Malformed(reason.clone())), None);
                return Err(ConfigError::Malformed {
                    identity: self.identity.to_string(),
                    reason,
                });
            }
        };

        let Some(document) = document else {
            self.reset(LoadState::Loaded, None);
            self.logger
                .debug(|| format!("配置 {} 没有已保存的文档，使用默认值", self.identity));
            return Ok(LoadOutcome::Fresh);
        };

        let serialized = document.version;
        match reconcile(&serialized, &defined, self.policy.as_ref()) {
            Reconciliation::Compatible => {
                let rejected = self.apply_document(document);
                Ok(LoadOutcome::Loaded { rejected })
            }
            Reconciliation::ForceLoad => {
                self.logger.warn(|| {
                    format!(
                        "配置 {} 版本 {} 与定义版本 {} 不一致，强制加载",
                        self.identity, serialized, defined
                    )
                });
                let rejected = self.apply_document(document);
                Ok(LoadOutcome::ForceLoaded {
                    serialized,
                    rejected,
                })
            }
            Reconciliation::Clobber => {
                self.logger.warn(|| {
                    format!(
                        "配置 {} 版本 {} 与定义版本 {} 不一致，丢弃已保存的值",
                        self.identity, serialized, defined
                    )
                });
                self.reset(LoadState::Loaded, Some(serialized));
                Ok(LoadOutcome::Clobbered { serialized })
            }
            Reconciliation::Reject => {
                self.logger.error(|| {
                    format!(
                        "配置 {} 版本 {} 与定义版本 {} 不兼容，加载失败",
                        self.identity, serialized, defined
                    )
                });
                self.reset(
                    LoadState::Failed(LoadFailure::IncompatibleVersion {
                        serialized,
                        defined,
                    }),
                    Some(serialized),
                );
                Err(ConfigError::IncompatibleVersion {
                    serialized: serialized.to_string(),
                    defined: defined.to_string(),
                })
            }
        }
    }

    /// 读取键的当前值
    ///
    /// # 错误
    /// * `KeyNotFound` - 键不在定义中
    /// * `TypeMismatch` - 定义中的同名键类型不同
    pub fn get_value<T: ConfigValue>(&self, key: &TypedConfigKey<T>) -> Result<T, ConfigError> {
        let defined = self.typed_definition_key::<T>(key.name())?;
        let state = self.state.lock();
        Ok(state
            .values
            .get(defined.name())
            .and_then(|value| (**value).downcast_ref::<T>())
            .cloned()
            .unwrap_or_else(|| key.definition().default_value()))
    }

    /// 读取键的当前值，键未定义或类型不符时返回 `None`
    pub fn try_get_value<T: ConfigValue>(&self, key: &TypedConfigKey<T>) -> Option<T> {
        self.get_value(key).ok()
    }

    /// 设置键的值
    ///
    /// 校验失败时不做任何修改；值确实改变时依次通知键、本配置、全局订阅者。
    pub fn set<T: ConfigValue>(
        &self,
        key: &TypedConfigKey<T>,
        value: T,
        label: Option<&str>,
    ) -> Result<(), ConfigError> {
        let defined = self.typed_definition_key::<T>(key.name())?.clone();
        self.commit(&defined, Arc::new(value), label)
    }

    /// 以 JSON 形式读取当前值
    pub fn get_raw<K: ConfigKeyRef + ?Sized>(&self, key: &K) -> Result<serde_json::Value, ConfigError> {
        let defined = self.definition_key(key)?;
        let value = self.current_dyn(defined);
        defined
            .erased()
            .encode(&value)
            .map_err(|e| ConfigError::Store(StoreError::Serialize {
                reason: e.to_string(),
            }))
    }

    /// 以 JSON 形式设置值，无法转换为键的类型时视为无效值
    pub fn set_raw<K: ConfigKeyRef + ?Sized>(
        &self,
        key: &K,
        raw: serde_json::Value,
        label: Option<&str>,
    ) -> Result<(), ConfigError> {
        let defined = self.definition_key(key)?.clone();
        let value = defined
            .erased()
            .decode(raw.clone())
            .map_err(|_| ConfigError::InvalidValue {
                key: defined.name().to_string(),
                value: raw.to_string(),
            })?;
        self.commit(&defined, value, label)
    }

    /// 清除显式设置的值，恢复为默认值
    ///
    /// 返回该键之前是否被显式设置过；只有被显式设置过时才会触发通知。
    pub fn unset<K: ConfigKeyRef + ?Sized>(&self, key: &K) -> Result<bool, ConfigError> {
        let defined = self.definition_key(key)?.clone();
        self.ensure_writable()?;

        let default = defined.erased().default_dyn();
        {
            let mut state = self.state.lock();
            if !state.explicit.remove(defined.name()) {
                return Ok(false);
            }
            state
                .values
                .insert(defined.name().to_string(), Arc::clone(&default));
        }

        self.after_change(&defined, &default, None);
        Ok(true)
    }

    /// 键是否在定义中
    pub fn is_key_defined<K: ConfigKeyRef + ?Sized>(&self, key: &K) -> bool {
        self.definition.contains_key(key)
    }

    /// 保存到存储
    ///
    /// `include_defaults` 为假时只写出显式设置且不等于默认值的键。
    /// 存储层的错误只记录不返回。
    ///
    /// # 错误
    /// 配置节未成功加载时返回 `SaveRejected`，避免用默认值覆盖磁盘上的文件
    pub fn save(&self, include_defaults: bool) -> Result<(), ConfigError> {
        let document = {
            let state = self.state.lock();
            match &state.load_state {
                LoadState::Loaded => {}
                LoadState::Unloaded => return Err(self.save_rejected("配置尚未加载")),
                LoadState::Failed(_) => return Err(self.save_rejected("配置加载失败")),
            }

            let mut values = BTreeMap::new();
            for key in self.definition.key_slice() {
                let erased = key.erased();
                let Some(current) = state.values.get(key.name()) else {
                    continue;
                };

                let write = include_defaults
                    || (state.explicit.contains(key.name())
                        && !erased.values_equal(current, &erased.default_dyn()));
                if !write {
                    continue;
                }

                let raw = erased.encode(current).map_err(|e| {
                    ConfigError::Store(StoreError::Serialize {
                        reason: e.to_string(),
                    })
                })?;
                values.insert(key.name().to_string(), raw);
            }

            ConfigDocument::new(self.definition.version(), values)
        };

        if let Err(e) = self.store.save(&self.identity, document) {
            self.logger
                .error(|| format!("保存配置 {} 失败: {}", self.identity, e));
        }
        Ok(())
    }

    /// 订阅本配置的变更
    pub fn on_this_configuration_changed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ConfigurationChangedEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_this_changed.subscribe(handler)
    }

    pub fn remove_on_this_configuration_changed(&self, id: SubscriptionId) -> bool {
        self.on_this_changed.unsubscribe(id)
    }

    /// 订阅所有配置的变更，进程级
    pub fn on_any_configuration_changed<F>(handler: F) -> SubscriptionId
    where
        F: Fn(&ConfigurationChangedEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        any_configuration_changed().subscribe(handler)
    }

    pub fn remove_on_any_configuration_changed(id: SubscriptionId) -> bool {
        any_configuration_changed().unsubscribe(id)
    }

    fn definition_key<K: ConfigKeyRef + ?Sized>(&self, key: &K) -> Result<&ConfigKey, ConfigError> {
        self.definition
            .get_key(key)
            .ok_or_else(|| ConfigError::KeyNotFound {
                key: key.key_name().to_string(),
            })
    }

    fn typed_definition_key<T: ConfigValue>(&self, name: &str) -> Result<&ConfigKey, ConfigError> {
        let defined = self.definition_key(name)?;
        if defined.erased().value_type_id() != TypeId::of::<T>() {
            return Err(ConfigError::TypeMismatch {
                key: name.to_string(),
                expected: defined.value_type_name(),
                actual: std::any::type_name::<T>(),
            });
        }
        Ok(defined)
    }

    fn current_dyn(&self, defined: &ConfigKey) -> DynValue {
        self.state
            .lock()
            .values
            .get(defined.name())
            .cloned()
            .unwrap_or_else(|| defined.erased().default_dyn())
    }

    fn ensure_writable(&self) -> Result<(), ConfigError> {
        match &self.state.lock().load_state {
            LoadState::Failed(LoadFailure::IncompatibleVersion {
                serialized,
                defined,
            }) => Err(ConfigError::IncompatibleVersion {
                serialized: serialized.to_string(),
                defined: defined.to_string(),
            }),
            LoadState::Failed(LoadFailure::Malformed(reason)) => Err(ConfigError::Malformed {
                identity: self.identity.to_string(),
                reason: reason.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// 校验并提交，值改变时保存并通知
    fn commit(&self, defined: &ConfigKey, value: DynValue, label: Option<&str>) -> Result<(), ConfigError> {
        let erased = defined.erased();
        if !erased.validate_dyn(&value) {
            return Err(ConfigError::InvalidValue {
                key: defined.name().to_string(),
                value: erased.format_value(&value),
            });
        }
        self.ensure_writable()?;

        let changed = {
            let mut state = self.state.lock();
            let changed = state
                .values
                .get(defined.name())
                .map_or(true, |current| !erased.values_equal(current, &value));
            state
                .values
                .insert(defined.name().to_string(), Arc::clone(&value));
            state.explicit.insert(defined.name().to_string());
            changed
        };

        if changed {
            self.after_change(defined, &value, label);
        }
        Ok(())
    }

    /// `value` 是本次提交的值，通知中不重新读取
    fn after_change(&self, defined: &ConfigKey, value: &DynValue, label: Option<&str>) {
        if self.definition.auto_save() {
            if let Err(e) = self.save(false) {
                self.logger.debug(|| format!("跳过自动保存: {e}"));
            }
        }

        defined.erased().fire_on_changed(value, &self.logger);

        if let Some(configuration) = self.this.upgrade() {
            let event = ConfigurationChangedEvent {
                configuration,
                key: defined.clone(),
                label: label.map(str::to_string),
            };
            fire_configuration_changed(&self.on_this_changed, &event, &self.logger);
        }
    }

    /// 所有值恢复为默认值并切换状态
    fn reset(&self, load_state: LoadState, persisted_version: Option<ConfigVersion>) {
        let mut state = self.state.lock();
        state.values = default_values(&self.definition);
        state.explicit.clear();
        state.load_state = load_state;
        state.persisted_version = persisted_version;
    }

    /// 把文档中的值写入，返回被拒绝的键数
    fn apply_document(&self, document: ConfigDocument) -> usize {
        let mut values = default_values(&self.definition);
        let mut explicit = HashSet::new();
        let mut rejected = 0;

        for (name, raw) in document.values {
            let Some(key) = self.definition.get_key(name.as_str()) else {
                self.logger
                    .debug(|| format!("配置 {} 中的键 [{}] 已不在定义中，忽略", self.identity, name));
                continue;
            };

            let erased = key.erased();
            match erased.decode(raw) {
                Ok(value) if erased.validate_dyn(&value) => {
                    values.insert(name.clone(), value);
                    explicit.insert(name);
                }
                Ok(value) => {
                    rejected += 1;
                    self.logger.warn(|| {
                        format!(
                            "配置键 [{}] 的值 {} 未通过校验，使用默认值",
                            name,
                            erased.format_value(&value)
                        )
                    });
                }
                Err(e) => {
                    rejected += 1;
                    self.logger.warn(|| {
                        format!("配置键 [{}] 的值无法解析为 {}: {}，使用默认值", name, erased.value_type_name(), e)
                    });
                }
            }
        }

        let mut state = self.state.lock();
        state.values = values;
        state.explicit = explicit;
        state.load_state = LoadState::Loaded;
        state.persisted_version = Some(document.version);
        rejected
    }

    #[cfg(test)]
    pub(crate) fn explicit_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().explicit.iter().cloned().collect();
        keys.sort();
        keys
    }

    fn save_rejected(&self, reason: &str) -> ConfigError {
        ConfigError::SaveRejected {
            identity: self.identity.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Debug for ConfigurationSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationSection")
            .field("identity", &self.identity)
            .field("version", &self.definition.version())
            .field("keys", &self.definition.len())
            .field("load_state", &self.load_state())
            .finish()
    }
}

fn default_values(definition: &ConfigurationDefinition) -> HashMap<String, DynValue> {
    definition
        .key_slice()
        .iter()
        .map(|key| (key.name().to_string(), key.erased().default_dyn()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::definition::ConfigurationDefinitionBuilder;
    use crate::config::key::ConfigKeyDefinition;
    use crate::config::version::IncompatibleConfigurationHandling;
    use crate::store::MemoryDocumentStore;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryDocumentStore>,
        count: TypedConfigKey<i32>,
        name: TypedConfigKey<String>,
        section: Arc<ConfigurationSection>,
    }

    fn fixture(auto_save: bool) -> Fixture {
        let store = Arc::new(MemoryDocumentStore::new());
        let count = ConfigKeyDefinition::<i32>::new("count")
            .with_default(|| 7)
            .with_range(0, 100)
            .into_key();
        let name = TypedConfigKey::<String>::new("name");

        let logger = ModLogger::new("Unit");
        let mut builder = ConfigurationDefinitionBuilder::new("Unit", logger.clone());
        builder.key(&count).key(&name).auto_save(auto_save);
        let definition = builder.build().unwrap();

        let context = SectionContext::new(
            store.clone(),
            Arc::new(IncompatibleConfigurationHandling::Error),
            logger,
        );
        let section = ConfigurationSection::new(definition, context).unwrap();
        Fixture {
            store,
            count,
            name,
            section,
        }
    }

    #[test]
    fn test_unloaded_section_reads_defaults_and_rejects_save() {
        let f = fixture(false);
        assert_eq!(f.section.load_state(), LoadState::Unloaded);
        assert_eq!(f.section.get_value(&f.count).unwrap(), 7);
        assert_eq!(f.count.get_value(), 7);
        assert!(matches!(
            f.section.save(true),
            Err(ConfigError::SaveRejected { .. })
        ));
    }

    #[test]
    fn test_fresh_load_then_set_through_key_handle() {
        let f = fixture(false);
        assert_eq!(f.section.load().unwrap(), LoadOutcome::Fresh);
        assert_eq!(f.section.persisted_version(), None);

        f.count.set_value(12, Some("unit")).unwrap();
        assert_eq!(f.section.get_value(&f.count).unwrap(), 12);
        assert_eq!(f.count.get_value(), 12);
    }

    #[test]
    fn test_invalid_value_leaves_previous() {
        let f = fixture(false);
        f.section.load().unwrap();
        f.section.set(&f.count, 50, None).unwrap();

        let err = f.section.set(&f.count, 500, None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert_eq!(f.count.get_value(), 50);
    }

    #[test]
    fn test_unknown_key_and_type_mismatch() {
        let f = fixture(false);
        let missing = TypedConfigKey::<i32>::new("missing");
        let wrong_type = TypedConfigKey::<bool>::new("count");

        assert!(matches!(
            f.section.get_value(&missing),
            Err(ConfigError::KeyNotFound { .. })
        ));
        assert!(matches!(
            f.section.set(&wrong_type, true, None),
            Err(ConfigError::TypeMismatch { .. })
        ));
        assert!(f.section.try_get_value(&missing).is_none());
        assert!(!f.section.is_key_defined(&missing));
        assert!(f.section.is_key_defined("name"));
    }

    #[test]
    fn test_reference_key_reads_defined_value() {
        let f = fixture(false);
        f.section.load().unwrap();
        f.section.set(&f.count, 30, None).unwrap();

        let reference = TypedConfigKey::<i32>::new("count");
        assert_eq!(f.section.get_value(&reference).unwrap(), 30);
    }

    #[test]
    fn test_raw_access() {
        let f = fixture(false);
        f.section.load().unwrap();

        f.section.set_raw("name", json!("alpha"), None).unwrap();
        assert_eq!(f.name.get_value(), "alpha");
        assert_eq!(f.section.get_raw("count").unwrap(), json!(7));
        assert!(matches!(
            f.section.set_raw("count", json!("seven"), None),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(f.name.untyped().current_value(), json!("alpha"));
    }

    #[test]
    fn test_save_without_defaults_skips_default_values() {
        let f = fixture(false);
        f.section.load().unwrap();
        f.section.set(&f.count, 7, None).unwrap();
        f.section.set(&f.name, "beta".to_string(), None).unwrap();
        f.section.save(false).unwrap();

        let saved = f.store.get(f.section.identity()).unwrap();
        assert_eq!(saved.values.len(), 1);
        assert_eq!(saved.values["name"], json!("beta"));

        f.section.save(true).unwrap();
        let saved = f.store.get(f.section.identity()).unwrap();
        assert_eq!(saved.values["count"], json!(7));
        assert_eq!(saved.values["name"], json!("beta"));
    }

    #[test]
    fn test_auto_save_on_set() {
        let f = fixture(true);
        f.section.load().unwrap();
        f.section.set(&f.count, 9, None).unwrap();
        assert_eq!(f.store.save_count(), 1);

        // 值未改变，不保存也不通知
        f.section.set(&f.count, 9, None).unwrap();
        assert_eq!(f.store.save_count(), 1);
    }

    #[test]
    fn test_unset_restores_default() {
        let f = fixture(false);
        f.section.load().unwrap();
        assert!(!f.section.unset(&f.count).unwrap());

        f.section.set(&f.count, 40, None).unwrap();
        assert_eq!(f.section.explicit_keys(), vec!["count".to_string()]);
        assert!(f.section.unset(&f.count).unwrap());
        assert_eq!(f.count.get_value(), 7);
        assert!(f.section.explicit_keys().is_empty());
        assert!(matches!(
            f.section.unset("missing"),
            Err(ConfigError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_load_drops_invalid_and_unknown_values() {
        let f = fixture(false);
        let mut values = BTreeMap::new();
        values.insert("count".to_string(), json!(1000));
        values.insert("name".to_string(), json!(5));
        values.insert("removed".to_string(), json!(true));
        f.store.insert(
            f.section.identity().clone(),
            ConfigDocument::new(ConfigVersion::default(), values),
        );

        assert_eq!(f.section.load().unwrap(), LoadOutcome::Loaded { rejected: 2 });
        assert_eq!(f.count.get_value(), 7);
        assert_eq!(f.name.get_value(), "");
        assert!(f.section.explicit_keys().is_empty());
    }

    #[test]
    fn test_store_failure_marks_malformed() {
        struct BrokenStore;
        impl DocumentStore for BrokenStore {
            fn load(&self, _: &DocumentIdentity) -> Result<Option<ConfigDocument>, StoreError> {
                Err(StoreError::Serialize {
                    reason: "broken".to_string(),
                })
            }
            fn save(&self, _: &DocumentIdentity, _: ConfigDocument) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let key = TypedConfigKey::<bool>::new("flag");
        let mut builder = ConfigurationDefinitionBuilder::new("Broken", ModLogger::new("Broken"));
        builder.key(&key);
        let section = ConfigurationSection::new(
            builder.build().unwrap(),
            SectionContext::new(
                Arc::new(BrokenStore),
                Arc::new(IncompatibleConfigurationHandling::Error),
                ModLogger::new("Broken"),
            ),
        )
        .unwrap();

        assert!(matches!(section.load(), Err(ConfigError::Malformed { .. })));
        assert!(matches!(
            section.load_state(),
            LoadState::Failed(LoadFailure::Malformed(_))
        ));
        assert!(matches!(
            section.set(&key, true, None),
            Err(ConfigError::Malformed { .. })
        ));
        assert!(!key.get_value());
    }

    #[test]
    fn test_key_cannot_bind_to_two_live_sections() {
        let f = fixture(false);
        let mut builder = ConfigurationDefinitionBuilder::new("Other", ModLogger::new("Other"));
        builder.key(&f.count);
        let result = ConfigurationSection::new(
            builder.build().unwrap(),
            SectionContext::new(
                f.store.clone(),
                Arc::new(IncompatibleConfigurationHandling::Error),
                ModLogger::new("Other"),
            ),
        );
        assert!(matches!(result, Err(ConfigError::KeyAlreadyBound { .. })));
    }

    #[test]
    fn test_key_event_carries_committed_value_under_contention() {
        let f = fixture(false);
        f.section.load().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        f.name.on_changed(move |value: &String| {
            sink.lock().push(value.clone());
            Ok(())
        });

        let writers: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|prefix| {
                let key = f.name.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        key.set_value(format!("{prefix}-{i}"), None).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let mut expected: Vec<String> = ["a", "b"]
            .into_iter()
            .flat_map(|prefix| (0..200).map(move |i| format!("{prefix}-{i}")))
            .collect();
        expected.sort();
        let mut received = received.lock().clone();
        received.sort();
        assert_eq!(received, expected);
    }
}
