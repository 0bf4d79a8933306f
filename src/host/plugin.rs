//! 旧版插件抽象
//!
//! [`LegacyMod`] 是旧版插件需要实现的接口，[`ModHost`] 在新宿主上承载单个插件：
//! 延迟构建它的配置、管理启用开关，并保证生命周期回调各只执行一次。

use crate::config::{
    AnnotatedField, ConfigVersion, ConfigurationDefinition, ConfigurationDefinitionBuilder,
    ConfigurationSection, IncompatibleConfigurationHandling, IncompatibleVersionPolicy,
    SectionContext, SubscriptionId, Subscribers, TypedConfigKey,
};
use crate::error::{Result, ShimError};
use crate::logging::ModLogger;
use crate::store::DocumentStore;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// 插件 ID 前缀
pub const LEGACY_ID_PREFIX: &str = "legacy.";

/// 启用开关所在的配置节名
pub const TOGGLE_SECTION: &str = "toggles";

/// 旧版插件接口
///
/// 除名称、作者和版本外都有默认实现。
pub trait LegacyMod: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn author(&self) -> &str;

    fn version(&self) -> &str;

    fn link(&self) -> Option<&str> {
        None
    }

    /// 声明为配置键的字段
    fn annotated_fields(&self) -> Vec<AnnotatedField> {
        Vec::new()
    }

    /// 在登记字段之后补充配置定义
    fn define_configuration(&self, _builder: &mut ConfigurationDefinitionBuilder) {}

    /// 已保存配置的版本与定义不一致时如何处理
    fn handle_incompatible_configuration_versions(
        &self,
        _serialized: &ConfigVersion,
        _defined: &ConfigVersion,
    ) -> IncompatibleConfigurationHandling {
        IncompatibleConfigurationHandling::Error
    }

    /// 引擎初始化完成后调用一次
    fn on_engine_init(&self, _host: &ModHost) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 把版本策略的决定交给插件
pub struct ModVersionPolicy {
    plugin: Arc<dyn LegacyMod>,
}

impl ModVersionPolicy {
    pub fn new(plugin: Arc<dyn LegacyMod>) -> Self {
        Self { plugin }
    }
}

impl IncompatibleVersionPolicy for ModVersionPolicy {
    fn handle_incompatible_versions(
        &self,
        serialized: &ConfigVersion,
        defined: &ConfigVersion,
    ) -> IncompatibleConfigurationHandling {
        self.plugin
            .handle_incompatible_configuration_versions(serialized, defined)
    }
}

/// 关闭事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownEvent {
    /// 插件名
    pub plugin: String,
    /// 是否因为整个应用退出而关闭
    pub application_exiting: bool,
}

struct EnabledToggle {
    key: TypedConfigKey<bool>,
    section: Arc<ConfigurationSection>,
}

#[derive(Default)]
struct ConfigurationSlot {
    section: Option<Arc<ConfigurationSection>>,
    toggle: Option<EnabledToggle>,
}

/// 承载单个旧版插件
pub struct ModHost {
    plugin: Arc<dyn LegacyMod>,
    store: Arc<dyn DocumentStore>,
    logger: ModLogger,
    full_id: String,
    slot: OnceLock<ConfigurationSlot>,
    ran: AtomicBool,
    shut_down: AtomicBool,
    on_shutting_down: Subscribers<ShutdownEvent>,
    on_shutdown_done: Subscribers<ShutdownEvent>,
}

impl ModHost {
    /// # 参数
    /// * `plugin` - 旧版插件实例
    /// * `store` - 插件配置使用的文档存储
    pub fn new(plugin: Arc<dyn LegacyMod>, store: Arc<dyn DocumentStore>) -> Self {
        let logger = ModLogger::new(plugin.name());
        let full_id = format!("{}{}", LEGACY_ID_PREFIX, plugin.name());
        Self {
            plugin,
            store,
            logger,
            full_id,
            slot: OnceLock::new(),
            ran: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            on_shutting_down: Subscribers::new(),
            on_shutdown_done: Subscribers::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    pub fn author(&self) -> &str {
        self.plugin.author()
    }

    pub fn version(&self) -> &str {
        self.plugin.version()
    }

    pub fn link(&self) -> Option<&str> {
        self.plugin.link()
    }

    /// 宿主内唯一的插件 ID，形如 `legacy.<name>`
    pub fn full_id(&self) -> &str {
        &self.full_id
    }

    pub fn plugin(&self) -> &Arc<dyn LegacyMod> {
        &self.plugin
    }

    pub fn logger(&self) -> &ModLogger {
        &self.logger
    }

    /// 插件的配置节
    ///
    /// 第一次调用时构建并加载，之后总是返回同一个实例；插件没有定义任何键时为 `None`。
    pub fn configuration(&self) -> Option<Arc<ConfigurationSection>> {
        self.slot().section.clone()
    }

    /// 是否有启用开关
    pub fn can_be_disabled(&self) -> bool {
        self.slot().toggle.is_some()
    }

    /// 没有启用开关的插件总是启用
    pub fn is_enabled(&self) -> bool {
        self.slot()
            .toggle
            .as_ref()
            .map_or(true, |toggle| toggle.key.get_value())
    }

    /// 修改启用状态
    ///
    /// # 错误
    /// 插件没有启用开关却要求禁用时返回生命周期错误
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        match &self.slot().toggle {
            Some(toggle) => {
                toggle.key.set_value(enabled, Some("set_enabled"))?;
                self.logger
                    .info(|| format!("插件已{}", if enabled { "启用" } else { "禁用" }));
                Ok(())
            }
            None if enabled => Ok(()),
            None => Err(self.lifecycle_error("插件没有启用开关，无法禁用")),
        }
    }

    /// 引擎初始化完成后运行插件，只能调用一次
    ///
    /// 返回插件初始化是否成功；失败只记录日志。
    pub fn run(&self) -> Result<bool> {
        if self.ran.swap(true, Ordering::SeqCst) {
            return Err(self.lifecycle_error("run 只能调用一次"));
        }

        let _ = self.slot();
        match self.plugin.on_engine_init(self) {
            Ok(()) => {
                self.logger.info(|| format!("插件 {} 初始化完成", self.full_id));
                Ok(true)
            }
            Err(e) => {
                self.logger.error(|| format!("插件初始化失败: {e:#}"));
                Ok(false)
            }
        }
    }

    pub fn has_run(&self) -> bool {
        self.ran.load(Ordering::SeqCst)
    }

    /// 关闭插件，只能调用一次
    ///
    /// 依次通知关闭订阅者、保存配置、通知关闭完成订阅者。返回是否全部成功。
    pub fn shutdown(&self, application_exiting: bool) -> Result<bool> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Err(self.lifecycle_error("shutdown 只能调用一次"));
        }

        let event = ShutdownEvent {
            plugin: self.name().to_string(),
            application_exiting,
        };
        let mut succeeded = true;

        if let Err(fault) = self.on_shutting_down.dispatch(&event, "shutting-down") {
            self.logger.error(|| format!("关闭订阅者出错: {fault}"));
            succeeded = false;
        }

        if let Some(slot) = self.slot.get() {
            let sections = slot
                .section
                .iter()
                .chain(slot.toggle.as_ref().map(|toggle| &toggle.section));
            for section in sections {
                if !section.definition().auto_save() || !section.load_state().is_loaded() {
                    continue;
                }
                if let Err(e) = section.save(false) {
                    self.logger.error(|| format!("关闭时保存配置失败: {e}"));
                    succeeded = false;
                }
            }
        }

        if let Err(fault) = self.on_shutdown_done.dispatch(&event, "shutdown-done") {
            self.logger.error(|| format!("关闭完成订阅者出错: {fault}"));
            succeeded = false;
        }

        self.logger.debug(|| format!("插件 {} 已关闭", self.full_id));
        Ok(succeeded)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn on_shutting_down<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ShutdownEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_shutting_down.subscribe(handler)
    }

    pub fn on_shutdown_done<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ShutdownEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_shutdown_done.subscribe(handler)
    }

    fn slot(&self) -> &ConfigurationSlot {
        self.slot.get_or_init(|| self.build_configuration())
    }

    fn build_configuration(&self) -> ConfigurationSlot {
        let mut builder = ConfigurationDefinitionBuilder::new(&*self.full_id, self.logger.clone());
        builder.scan_annotated_fields(self.plugin.annotated_fields());
        self.plugin.define_configuration(&mut builder);

        let toggle_key = builder.try_get_enabled_toggle(true);
        let policy: Arc<dyn IncompatibleVersionPolicy> =
            Arc::new(ModVersionPolicy::new(Arc::clone(&self.plugin)));
        let context = SectionContext::new(Arc::clone(&self.store), policy, self.logger.clone());

        let section = builder
            .build()
            .and_then(|definition| self.open_section(definition, context));

        let toggle = toggle_key.and_then(|key| {
            let mut toggle_builder =
                ConfigurationDefinitionBuilder::new(&*self.full_id, self.logger.clone());
            toggle_builder.key(&key);
            let definition = toggle_builder.build()?;
            let context = SectionContext::new(
                Arc::clone(&self.store),
                Arc::new(IncompatibleConfigurationHandling::Clobber),
                self.logger.clone(),
            )
            .with_section_id(TOGGLE_SECTION);
            let section = self.open_section(definition, context)?;
            Some(EnabledToggle { key, section })
        });

        ConfigurationSlot { section, toggle }
    }

    fn open_section(
        &self,
        definition: ConfigurationDefinition,
        context: SectionContext,
    ) -> Option<Arc<ConfigurationSection>> {
        let section = match ConfigurationSection::new(definition, context) {
            Ok(section) => section,
            Err(e) => {
                self.logger.error(|| format!("创建配置失败: {e}"));
                return None;
            }
        };

        // 加载失败时配置节仍然可用，读取返回默认值
        match section.load() {
            Ok(outcome) => self
                .logger
                .debug(|| format!("配置 {} 加载完成: {:?}", section.identity(), outcome)),
            Err(e) => self
                .logger
                .error(|| format!("配置 {} 加载失败: {}", section.identity(), e)),
        }
        Some(section)
    }

    fn lifecycle_error(&self, reason: &str) -> ShimError {
        ShimError::Lifecycle {
            plugin: self.full_id.clone(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Debug for ModHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModHost")
            .field("full_id", &self.full_id)
            .field("author", &self.author())
            .field("version", &self.version())
            .field("ran", &self.has_run())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigKeyDefinition;
    use crate::store::MemoryDocumentStore;

    struct Plain;

    impl LegacyMod for Plain {
        fn name(&self) -> &str {
            "Plain"
        }
        fn author(&self) -> &str {
            "tester"
        }
        fn version(&self) -> &str {
            "0.1.0"
        }
    }

    struct Toggled {
        enabled: TypedConfigKey<bool>,
        speed: TypedConfigKey<f32>,
    }

    impl Toggled {
        fn new() -> Self {
            Self {
                enabled: ConfigKeyDefinition::new("Enabled")
                    .with_default_value(true)
                    .into_key(),
                speed: ConfigKeyDefinition::new("speed")
                    .with_default_value(1.0)
                    .into_key(),
            }
        }
    }

    impl LegacyMod for Toggled {
        fn name(&self) -> &str {
            "Toggled"
        }
        fn author(&self) -> &str {
            "tester"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn define_configuration(&self, builder: &mut ConfigurationDefinitionBuilder) {
            builder.key(&self.enabled).key(&self.speed);
        }
        fn on_engine_init(&self, _host: &ModHost) -> anyhow::Result<()> {
            anyhow::bail!("engine missing")
        }
    }

    fn host(plugin: impl LegacyMod) -> ModHost {
        ModHost::new(Arc::new(plugin), Arc::new(MemoryDocumentStore::new()))
    }

    #[test]
    fn test_plugin_without_keys() {
        let host = host(Plain);
        assert_eq!(host.full_id(), "legacy.Plain");
        assert!(host.configuration().is_none());
        assert!(!host.can_be_disabled());
        assert!(host.is_enabled());
        assert!(host.set_enabled(true).is_ok());
        assert!(matches!(
            host.set_enabled(false),
            Err(ShimError::Lifecycle { .. })
        ));
    }

    #[test]
    fn test_toggle_is_split_from_configuration() {
        let host = host(Toggled::new());
        let configuration = host.configuration().unwrap();

        assert!(host.can_be_disabled());
        assert!(!configuration.is_key_defined("Enabled"));
        assert!(configuration.is_key_defined("speed"));
        assert!(Arc::ptr_eq(&configuration, &host.configuration().unwrap()));

        assert!(host.is_enabled());
        host.set_enabled(false).unwrap();
        assert!(!host.is_enabled());
    }

    #[test]
    fn test_run_and_shutdown_only_once() {
        let host = host(Toggled::new());
        assert!(!host.run().unwrap());
        assert!(host.run().is_err());

        assert!(host.shutdown(true).unwrap());
        assert!(matches!(
            host.shutdown(true),
            Err(ShimError::Lifecycle { .. })
        ));
    }
}
