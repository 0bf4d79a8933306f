//! 配置定义与构建器
//!
//! 定义在第一次访问值之前由插件构建，构建之后不可修改。

use crate::config::key::{ConfigKey, ConfigKeyRef, TypedConfigKey};
use crate::config::value::ValueKind;
use crate::config::version::ConfigVersion;
use crate::error::ConfigError;
use crate::logging::ModLogger;

/// 优先匹配的启用开关名称，按顺序检查，不区分大小写
const ENABLED_TOGGLE_NAMES: [&str; 4] = ["enabled", "mod enabled", "mod_enabled", "is_enabled"];

/// 插件的配置定义：一组键加上语义版本
#[derive(Debug, Clone)]
pub struct ConfigurationDefinition {
    owner: String,
    version: ConfigVersion,
    keys: Vec<ConfigKey>,
    auto_save: bool,
}

impl ConfigurationDefinition {
    /// 所属插件名
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn version(&self) -> ConfigVersion {
        self.version
    }

    pub fn auto_save(&self) -> bool {
        self.auto_save
    }

    /// 键集合的副本
    pub fn keys(&self) -> Vec<ConfigKey> {
        self.keys.clone()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// 按名称查找定义键
    pub fn get_key<K: ConfigKeyRef + ?Sized>(&self, key: &K) -> Option<&ConfigKey> {
        self.keys.iter().find(|defined| defined.name() == key.key_name())
    }

    pub fn contains_key<K: ConfigKeyRef + ?Sized>(&self, key: &K) -> bool {
        self.get_key(key).is_some()
    }

    pub(crate) fn key_slice(&self) -> &[ConfigKey] {
        &self.keys
    }
}

#[derive(Debug, Clone)]
enum FieldBinding {
    Key(ConfigKey),
    Incompatible(&'static str),
}

/// 显式登记的插件字段
///
/// 代替运行时反射：插件在 [`crate::host::LegacyMod::annotated_fields`] 中列出
/// 自己声明为配置键的字段，可选附带数值范围标注。
#[derive(Debug, Clone)]
pub struct AnnotatedField {
    field: String,
    binding: FieldBinding,
    range: Option<(f64, f64)>,
}

impl AnnotatedField {
    /// 值为配置键的字段
    pub fn key(field: impl Into<String>, key: impl Into<ConfigKey>) -> Self {
        Self {
            field: field.into(),
            binding: FieldBinding::Key(key.into()),
            range: None,
        }
    }

    /// 声明类型不是配置键的字段，扫描时会被跳过
    pub fn incompatible(field: impl Into<String>, declared_type: &'static str) -> Self {
        Self {
            field: field.into(),
            binding: FieldBinding::Incompatible(declared_type),
            range: None,
        }
    }

    /// 附带范围标注
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }
}

/// 配置定义构建器
pub struct ConfigurationDefinitionBuilder {
    owner: String,
    version: ConfigVersion,
    keys: Vec<ConfigKey>,
    auto_save: bool,
    logger: ModLogger,
}

impl ConfigurationDefinitionBuilder {
    /// # 参数
    /// * `owner` - 所属插件名
    /// * `logger` - 所属插件的日志句柄，用于报告被跳过的字段
    pub fn new(owner: impl Into<String>, logger: ModLogger) -> Self {
        Self {
            owner: owner.into(),
            version: ConfigVersion::default(),
            keys: Vec::new(),
            auto_save: true,
            logger,
        }
    }

    /// 添加键，同名键会被替换
    pub fn key(&mut self, key: impl Into<ConfigKey>) -> &mut Self {
        let key = key.into();
        match self.keys.iter_mut().find(|existing| **existing == key) {
            Some(existing) if existing.is_same_key(&key) => {}
            Some(existing) => {
                self.logger
                    .warn(|| format!("配置键 [{}] 被重复定义，使用最后一次定义", key.name()));
                *existing = key;
            }
            None => self.keys.push(key),
        }
        self
    }

    pub fn version(&mut self, version: ConfigVersion) -> &mut Self {
        self.version = version;
        self
    }

    /// 以字符串形式设置版本，例如 `"2.1.0"`
    pub fn version_str(&mut self, version: &str) -> Result<&mut Self, ConfigError> {
        self.version = version.parse()?;
        Ok(self)
    }

    pub fn auto_save(&mut self, auto_save: bool) -> &mut Self {
        self.auto_save = auto_save;
        self
    }

    /// 收集登记的字段
    ///
    /// 声明类型不兼容的字段只记录警告；范围标注按键的值类型转换后附加。
    pub fn scan_annotated_fields<I>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = AnnotatedField>,
    {
        for field in fields {
            let key = match field.binding {
                FieldBinding::Key(key) => key,
                FieldBinding::Incompatible(declared_type) => {
                    self.logger.warn(|| {
                        format!(
                            "字段 {} 的类型 {} 不是配置键，已跳过",
                            field.field, declared_type
                        )
                    });
                    continue;
                }
            };

            if let Some((min, max)) = field.range {
                if !key.erased().attach_range_bounds(min, max) {
                    self.logger.warn(|| {
                        format!(
                            "字段 {} 的范围 [{}, {}] 无法转换为 {}，已忽略",
                            field.field,
                            min,
                            max,
                            key.value_type_name()
                        )
                    });
                }
            }

            self.key(key);
        }
        self
    }

    /// 推断代表“插件已启用”的布尔键
    ///
    /// 先按固定名称列表精确匹配，找不到时退而寻找唯一一个名称包含 `enabled` 的布尔键。
    /// `remove` 为真时把找到的键从定义中移除，交由插件自身管理。
    pub fn try_get_enabled_toggle(&mut self, remove: bool) -> Option<TypedConfigKey<bool>> {
        let bool_keys = || {
            self.keys
                .iter()
                .filter(|key| key.value_kind() == ValueKind::Bool)
        };

        let found = ENABLED_TOGGLE_NAMES
            .iter()
            .find_map(|name| bool_keys().find(|key| key.name().eq_ignore_ascii_case(name)))
            .or_else(|| {
                let mut candidates =
                    bool_keys().filter(|key| key.name().to_lowercase().contains("enabled"));
                match (candidates.next(), candidates.next()) {
                    (Some(only), None) => Some(only),
                    _ => None,
                }
            })?
            .clone();

        let toggle = found.typed::<bool>()?;
        if remove {
            self.keys.retain(|key| !key.is_same_key(&found));
        }
        Some(toggle)
    }

    /// 构建定义，没有任何键时返回 `None`
    pub fn build(self) -> Option<ConfigurationDefinition> {
        if self.keys.is_empty() {
            return None;
        }

        Some(ConfigurationDefinition {
            owner: self.owner,
            version: self.version,
            keys: self.keys,
            auto_save: self.auto_save,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::key::{ConfigKeyDefinition, ConfigKeyRange};

    fn builder() -> ConfigurationDefinitionBuilder {
        ConfigurationDefinitionBuilder::new("TestMod", ModLogger::new("TestMod"))
    }

    #[test]
    fn test_build_without_keys_is_none() {
        assert!(builder().build().is_none());
    }

    #[test]
    fn test_defaults() {
        let mut builder = builder();
        builder.key(TypedConfigKey::<i32>::new("count"));
        let definition = builder.build().unwrap();

        assert_eq!(definition.version(), ConfigVersion::new(1, 0, 0));
        assert!(definition.auto_save());
        assert_eq!(definition.owner(), "TestMod");
        assert!(definition.contains_key("count"));
    }

    #[test]
    fn test_re_adding_same_name_replaces() {
        let first = TypedConfigKey::<i32>::new("count");
        let second = ConfigKeyDefinition::<i32>::new("count")
            .with_default(|| 3)
            .into_key();

        let mut builder = builder();
        builder.key(&first).key(&first).key(&second);
        let definition = builder.build().unwrap();

        assert_eq!(definition.len(), 1);
        let kept = definition.get_key("count").unwrap().typed::<i32>().unwrap();
        assert!(kept.is_same_key(&second));
    }

    #[test]
    fn test_version_str() {
        let mut builder = builder();
        builder.key(TypedConfigKey::<bool>::new("flag"));
        assert!(builder.version_str("abc").is_err());
        builder.version_str("2.1").unwrap();
        assert_eq!(builder.build().unwrap().version(), ConfigVersion::new(2, 1, 0));
    }

    #[test]
    fn test_scan_skips_incompatible_and_attaches_range() {
        let volume = TypedConfigKey::<u8>::new("volume");
        let name = TypedConfigKey::<String>::new("name");

        let mut builder = builder();
        builder.scan_annotated_fields([
            AnnotatedField::key("volume", &volume).with_range(0.0, 10.0),
            AnnotatedField::incompatible("timer", "Duration"),
            AnnotatedField::key("name", &name).with_range(0.0, 1.0),
        ]);
        let definition = builder.build().unwrap();

        assert_eq!(definition.len(), 2);
        assert!(!definition.contains_key("timer"));
        assert!(!volume.validate(&11));
        assert!(volume.validate(&10));
        assert!(name.definition().range().is_none());
    }

    #[test]
    fn test_scan_attaches_range_to_optional_numbers() {
        let ratio = TypedConfigKey::<Option<f64>>::new("ratio");
        let limit = TypedConfigKey::<Option<i32>>::new("limit");

        let mut builder = builder();
        builder.scan_annotated_fields([
            AnnotatedField::key("ratio", &ratio).with_range(0.0, 1.0),
            AnnotatedField::key("limit", &limit).with_range(1.0, 5.0),
        ]);
        builder.build().unwrap();

        assert_eq!(
            ratio.definition().range(),
            Some(ConfigKeyRange::new(Some(0.0), Some(1.0)))
        );
        assert!(ratio.validate(&Some(0.5)));
        assert!(!ratio.validate(&Some(1.5)));
        assert!(ratio.validate(&None));
        assert!(!limit.validate(&Some(0)));
        assert!(limit.validate(&Some(5)));
    }

    #[test]
    fn test_enabled_toggle_priority_names() {
        let mut builder = builder();
        builder
            .key(TypedConfigKey::<bool>::new("feature_enabled"))
            .key(TypedConfigKey::<bool>::new("Mod Enabled"))
            .key(TypedConfigKey::<i32>::new("count"));

        let toggle = builder.try_get_enabled_toggle(true).unwrap();
        assert_eq!(toggle.name(), "Mod Enabled");

        let definition = builder.build().unwrap();
        assert!(!definition.contains_key("Mod Enabled"));
        assert_eq!(definition.len(), 2);
    }

    #[test]
    fn test_enabled_toggle_fallback_requires_single_candidate() {
        let mut single = builder();
        single
            .key(TypedConfigKey::<bool>::new("FeatureEnabled"))
            .key(TypedConfigKey::<String>::new("enabled_list"));
        let toggle = single.try_get_enabled_toggle(false).unwrap();
        assert_eq!(toggle.name(), "FeatureEnabled");
        assert_eq!(single.build().unwrap().len(), 2);

        let mut ambiguous = builder();
        ambiguous
            .key(TypedConfigKey::<bool>::new("a_enabled"))
            .key(TypedConfigKey::<bool>::new("b_enabled"));
        assert!(ambiguous.try_get_enabled_toggle(true).is_none());

        let mut none = builder();
        none.key(TypedConfigKey::<i32>::new("enabled"));
        assert!(none.try_get_enabled_toggle(true).is_none());
    }

    #[test]
    fn test_keys_returns_copy() {
        let mut builder = builder();
        builder.key(TypedConfigKey::<bool>::new("flag"));
        let definition = builder.build().unwrap();

        let mut copy = definition.keys();
        copy.clear();
        assert_eq!(definition.len(), 1);
    }
}
