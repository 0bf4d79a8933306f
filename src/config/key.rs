//! 配置键
//!
//! - [`ConfigKeyDefinition`]：编译期写死的权威定义（默认值、校验器、数值范围）
//! - [`TypedConfigKey`]：插件持有的共享句柄，负责读写当前值与单键变更通知
//! - [`ConfigKey`]：无类型的引用包装，相等性只看名称

use crate::config::events::{fire_key_changed, SubscriptionId, Subscribers};
use crate::config::section::ConfigurationSection;
use crate::config::value::{ConfigValue, ValueKind};
use crate::error::ConfigError;
use crate::logging::ModLogger;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// 类型擦除后的值
pub(crate) type DynValue = Arc<dyn Any + Send + Sync>;

type DefaultProvider<T> = Arc<dyn Fn() -> T + Send + Sync>;
type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

static SPACER_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// 数值范围约束，闭区间
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigKeyRange<T> {
    min: T,
    max: T,
}

impl<T: ConfigValue> ConfigKeyRange<T> {
    pub fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    pub fn min(&self) -> &T {
        &self.min
    }

    pub fn max(&self) -> &T {
        &self.max
    }

    /// 值是否落在 `[min, max]` 内
    pub fn contains(&self, value: &T) -> bool {
        value.within_range(&self.min, &self.max)
    }
}

/// 配置键的权威定义
pub struct ConfigKeyDefinition<T: ConfigValue> {
    name: String,
    description: Option<String>,
    internal_access_only: bool,
    default_provider: Option<DefaultProvider<T>>,
    validator: Option<Validator<T>>,
    range: RwLock<Option<ConfigKeyRange<T>>>,
}

impl<T: ConfigValue> ConfigKeyDefinition<T> {
    /// 创建定义
    ///
    /// 名称为空白时改用 `Spacer-N` 占位名并记录警告。
    pub fn new(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if name.trim().is_empty() {
            let placeholder = format!("Spacer-{}", SPACER_COUNTER.fetch_add(1, Ordering::Relaxed));
            warn!("配置键名称为空白，改用占位名 {}", placeholder);
            name = placeholder;
        }

        Self {
            name,
            description: None,
            internal_access_only: false,
            default_provider: None,
            validator: None,
            range: RwLock::new(None),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// 设置默认值生成函数，要求无副作用
    pub fn with_default<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.default_provider = Some(Arc::new(provider));
        self
    }

    /// 以固定值作为默认值
    pub fn with_default_value(self, value: T) -> Self {
        self.with_default(move || value.clone())
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// 仅允许所属插件访问
    pub fn internal_access_only(mut self, internal: bool) -> Self {
        self.internal_access_only = internal;
        self
    }

    pub fn with_range(self, min: T, max: T) -> Self {
        self.set_range(ConfigKeyRange::new(min, max));
        self
    }

    /// 转换为可共享的键句柄
    pub fn into_key(self) -> TypedConfigKey<T> {
        TypedConfigKey::from(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn is_internal_access_only(&self) -> bool {
        self.internal_access_only
    }

    pub fn value_kind(&self) -> ValueKind {
        T::KIND
    }

    pub fn value_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    /// 尝试计算默认值，未设置生成函数时返回 `None`
    ///
    /// 生成函数中的 panic 不会被吞掉。
    pub fn try_compute_default(&self) -> Option<T> {
        self.default_provider.as_ref().map(|provider| provider())
    }

    /// 计算出的默认值，没有生成函数时使用类型默认值
    pub fn default_value(&self) -> T {
        self.try_compute_default().unwrap_or_default()
    }

    /// 校验值：显式校验器与范围约束同时满足才算有效
    pub fn validate(&self, value: &T) -> bool {
        let in_range = self
            .range
            .read()
            .as_ref()
            .map_or(true, |range| range.contains(value));

        in_range
            && self
                .validator
                .as_ref()
                .map_or(true, |validator| validator(value))
    }

    pub fn range(&self) -> Option<ConfigKeyRange<T>> {
        self.range.read().clone()
    }

    /// 附加或替换范围约束
    pub fn set_range(&self, range: ConfigKeyRange<T>) {
        *self.range.write() = Some(range);
    }
}

impl<T: ConfigValue> fmt::Debug for ConfigKeyDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigKeyDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("internal_access_only", &self.internal_access_only)
            .field("type", &self.value_type_name())
            .field("has_default", &self.default_provider.is_some())
            .field("has_validator", &self.validator.is_some())
            .field("range", &*self.range.read())
            .finish()
    }
}

struct KeyInner<T: ConfigValue> {
    definition: ConfigKeyDefinition<T>,
    on_changed: Subscribers<T>,
    section: RwLock<Weak<ConfigurationSection>>,
}

/// 有类型的配置键句柄
///
/// 克隆得到的是同一个键。绑定到配置节之后，`get_value`/`set_value` 直接读写该配置节。
pub struct TypedConfigKey<T: ConfigValue> {
    inner: Arc<KeyInner<T>>,
}

impl<T: ConfigValue> TypedConfigKey<T> {
    /// 只有名称的键：没有默认值生成函数，也没有校验器
    pub fn new(name: impl Into<String>) -> Self {
        ConfigKeyDefinition::new(name).into_key()
    }

    pub fn definition(&self) -> &ConfigKeyDefinition<T> {
        &self.inner.definition
    }

    pub fn name(&self) -> &str {
        self.inner.definition.name()
    }

    pub fn description(&self) -> Option<&str> {
        self.inner.definition.description()
    }

    pub fn is_internal_access_only(&self) -> bool {
        self.inner.definition.is_internal_access_only()
    }

    /// 当前值；未绑定或从未设置时返回计算出的默认值，永不失败
    pub fn get_value(&self) -> T {
        self.bound_section()
            .and_then(|section| section.try_get_value(self))
            .unwrap_or_else(|| self.inner.definition.default_value())
    }

    /// 设置值
    ///
    /// # 错误
    /// * `KeyNotFound` - 键没有绑定到任何配置
    /// * `InvalidValue` - 值未通过校验
    pub fn set_value(&self, value: T, label: Option<&str>) -> Result<(), ConfigError> {
        let section = self.bound_section().ok_or_else(|| ConfigError::KeyNotFound {
            key: self.name().to_string(),
        })?;
        section.set(self, value, label)
    }

    pub fn try_compute_default(&self) -> Option<T> {
        self.inner.definition.try_compute_default()
    }

    pub fn validate(&self, value: &T) -> bool {
        self.inner.definition.validate(value)
    }

    /// 构造之后再附加范围约束
    pub fn attach_range(&self, min: T, max: T) {
        self.inner.definition.set_range(ConfigKeyRange::new(min, max));
    }

    /// 订阅该键的值变更
    pub fn on_changed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.on_changed.subscribe(handler)
    }

    pub fn remove_on_changed(&self, id: SubscriptionId) -> bool {
        self.inner.on_changed.unsubscribe(id)
    }

    /// 无类型引用
    pub fn untyped(&self) -> ConfigKey {
        ConfigKey {
            inner: self.inner.clone(),
        }
    }

    /// 是否为同一个定义键（而不仅是同名）
    pub fn is_same_key(&self, other: &TypedConfigKey<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn bound_section(&self) -> Option<Arc<ConfigurationSection>> {
        self.inner.section.read().upgrade()
    }
}

impl<T: ConfigValue> From<ConfigKeyDefinition<T>> for TypedConfigKey<T> {
    fn from(definition: ConfigKeyDefinition<T>) -> Self {
        Self {
            inner: Arc::new(KeyInner {
                definition,
                on_changed: Subscribers::new(),
                section: RwLock::new(Weak::new()),
            }),
        }
    }
}

impl<T: ConfigValue> Clone for TypedConfigKey<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ConfigValue> PartialEq for TypedConfigKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl<T: ConfigValue> Eq for TypedConfigKey<T> {}

impl<T: ConfigValue> Hash for TypedConfigKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl<T: ConfigValue> fmt::Debug for TypedConfigKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner.definition, f)
    }
}

/// 配置节通过它操作任意类型的键
pub(crate) trait ErasedKey: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> Option<&str>;
    fn internal_access_only(&self) -> bool;
    fn value_kind(&self) -> ValueKind;
    fn value_type_name(&self) -> &'static str;
    fn value_type_id(&self) -> TypeId;
    fn default_dyn(&self) -> DynValue;
    fn try_default_dyn(&self) -> Option<DynValue>;
    fn validate_dyn(&self, value: &DynValue) -> bool;
    fn values_equal(&self, left: &DynValue, right: &DynValue) -> bool;
    fn decode(&self, raw: serde_json::Value) -> Result<DynValue, serde_json::Error>;
    fn encode(&self, value: &DynValue) -> Result<serde_json::Value, serde_json::Error>;
    fn format_value(&self, value: &DynValue) -> String;
    fn attach_range_bounds(&self, min: f64, max: f64) -> bool;
    fn bind(&self, section: Weak<ConfigurationSection>) -> bool;
    fn bound_section(&self) -> Option<Arc<ConfigurationSection>>;
    fn fire_on_changed(&self, value: &DynValue, logger: &ModLogger);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: ConfigValue> ErasedKey for KeyInner<T> {
    fn name(&self) -> &str {
        self.definition.name()
    }

    fn description(&self) -> Option<&str> {
        self.definition.description()
    }

    fn internal_access_only(&self) -> bool {
        self.definition.is_internal_access_only()
    }

    fn value_kind(&self) -> ValueKind {
        T::KIND
    }

    fn value_type_name(&self) -> &'static str {
        self.definition.value_type_name()
    }

    fn value_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn default_dyn(&self) -> DynValue {
        Arc::new(self.definition.default_value())
    }

    fn try_default_dyn(&self) -> Option<DynValue> {
        self.definition
            .try_compute_default()
            .map(|value| Arc::new(value) as DynValue)
    }

    fn validate_dyn(&self, value: &DynValue) -> bool {
        (**value)
            .downcast_ref::<T>()
            .is_some_and(|value| self.definition.validate(value))
    }

    fn values_equal(&self, left: &DynValue, right: &DynValue) -> bool {
        match ((**left).downcast_ref::<T>(), (**right).downcast_ref::<T>()) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        }
    }

    fn decode(&self, raw: serde_json::Value) -> Result<DynValue, serde_json::Error> {
        let value: T = serde_json::from_value(raw)?;
        Ok(Arc::new(value))
    }

    fn encode(&self, value: &DynValue) -> Result<serde_json::Value, serde_json::Error> {
        match (**value).downcast_ref::<T>() {
            Some(value) => serde_json::to_value(value),
            None => Err(serde::ser::Error::custom(format!(
                "值类型不是 {}",
                self.value_type_name()
            ))),
        }
    }

    fn format_value(&self, value: &DynValue) -> String {
        match (**value).downcast_ref::<T>() {
            Some(value) => format!("{value:?}"),
            None => "<类型不匹配>".to_string(),
        }
    }

    fn attach_range_bounds(&self, min: f64, max: f64) -> bool {
        match (T::from_range_bound(min), T::from_range_bound(max)) {
            (Some(min), Some(max)) => {
                self.definition.set_range(ConfigKeyRange::new(min, max));
                true
            }
            _ => false,
        }
    }

    fn bind(&self, section: Weak<ConfigurationSection>) -> bool {
        let mut slot = self.section.write();
        if slot.strong_count() > 0 && !Weak::ptr_eq(&slot, &section) {
            return false;
        }
        *slot = section;
        true
    }

    fn bound_section(&self) -> Option<Arc<ConfigurationSection>> {
        self.section.read().upgrade()
    }

    fn fire_on_changed(&self, value: &DynValue, logger: &ModLogger) {
        if let Some(value) = (**value).downcast_ref::<T>() {
            fire_key_changed(&self.on_changed, self.name(), value, logger);
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// 无类型的配置键引用
///
/// 相等性与哈希只看名称。
#[derive(Clone)]
pub struct ConfigKey {
    inner: Arc<dyn ErasedKey>,
}

impl ConfigKey {
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn description(&self) -> Option<&str> {
        self.inner.description()
    }

    pub fn is_internal_access_only(&self) -> bool {
        self.inner.internal_access_only()
    }

    pub fn value_kind(&self) -> ValueKind {
        self.inner.value_kind()
    }

    pub fn value_type_name(&self) -> &'static str {
        self.inner.value_type_name()
    }

    /// 以 JSON 形式计算默认值，未设置默认值提供者时返回 `None`
    pub fn try_compute_default(&self) -> Option<serde_json::Value> {
        let value = self.inner.try_default_dyn()?;
        self.inner.encode(&value).ok()
    }

    /// 以 JSON 形式校验值；无法转换为键的类型时视为无效
    pub fn validate(&self, raw: &serde_json::Value) -> bool {
        self.inner
            .decode(raw.clone())
            .is_ok_and(|value| self.inner.validate_dyn(&value))
    }

    /// 恢复为有类型的键，类型不符时返回 `None`
    pub fn typed<T: ConfigValue>(&self) -> Option<TypedConfigKey<T>> {
        Arc::clone(&self.inner)
            .into_any()
            .downcast::<KeyInner<T>>()
            .ok()
            .map(|inner| TypedConfigKey { inner })
    }

    /// 当前值的 JSON 形式，未绑定时为默认值
    pub fn current_value(&self) -> serde_json::Value {
        self.inner
            .bound_section()
            .and_then(|section| section.get_raw(self).ok())
            .or_else(|| self.try_compute_default())
            .unwrap_or(serde_json::Value::Null)
    }

    pub(crate) fn erased(&self) -> &dyn ErasedKey {
        self.inner.as_ref()
    }

    pub(crate) fn is_same_key(&self, other: &ConfigKey) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: ConfigValue> From<TypedConfigKey<T>> for ConfigKey {
    fn from(key: TypedConfigKey<T>) -> Self {
        ConfigKey { inner: key.inner }
    }
}

impl<T: ConfigValue> From<&TypedConfigKey<T>> for ConfigKey {
    fn from(key: &TypedConfigKey<T>) -> Self {
        key.untyped()
    }
}

impl PartialEq for ConfigKey {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for ConfigKey {}

impl Hash for ConfigKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl<T: ConfigValue> PartialEq<TypedConfigKey<T>> for ConfigKey {
    fn eq(&self, other: &TypedConfigKey<T>) -> bool {
        self.name() == other.name()
    }
}

impl fmt::Debug for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigKey")
            .field("name", &self.name())
            .field("type", &self.value_type_name())
            .finish()
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConfigKey Name: {}, Description: {}, InternalAccessOnly: {}, Type: {}, Value: {}",
            self.name(),
            self.description().unwrap_or(""),
            self.is_internal_access_only(),
            self.value_type_name(),
            self.current_value()
        )
    }
}

/// 可以按名称在配置节中查找的键
pub trait ConfigKeyRef {
    fn key_name(&self) -> &str;
}

impl ConfigKeyRef for ConfigKey {
    fn key_name(&self) -> &str {
        self.name()
    }
}

impl<T: ConfigValue> ConfigKeyRef for TypedConfigKey<T> {
    fn key_name(&self) -> &str {
        self.name()
    }
}

impl ConfigKeyRef for str {
    fn key_name(&self) -> &str {
        self
    }
}
