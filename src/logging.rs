//! 日志系统模块
//!
//! 提供结构化日志初始化，以及注入到每个插件的日志句柄

use log::LevelFilter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, registry, EnvFilter, Layer};

/// 全局日志初始化状态
#[derive(Debug)]
struct GlobalLoggingState {
    /// 是否已初始化
    initialized: bool,
    /// 初始化结果
    init_result: Result<(), String>,
    /// 当前配置
    current_config: Option<LogConfig>,
}

impl Default for GlobalLoggingState {
    fn default() -> Self {
        Self {
            initialized: false,
            init_result: Ok(()),
            current_config: None,
        }
    }
}

/// 全局日志状态管理器
static GLOBAL_LOGGING_STATE: OnceLock<Mutex<GlobalLoggingState>> = OnceLock::new();

/// 日志配置结构
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: LevelFilter,
    /// 日志文件路径（可选）
    pub file_path: Option<PathBuf>,
    /// 是否输出到控制台
    pub console: bool,
    /// 是否使用JSON格式
    pub json_format: bool,
    /// 模块级别日志控制
    pub module_levels: HashMap<String, LevelFilter>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file_path: None,
            console: true,
            json_format: false,
            module_levels: HashMap::new(),
        }
    }
}

/// 日志系统管理器
#[derive(Debug)]
pub struct LoggingSystem {
    /// 配置
    config: LogConfig,
}

impl LoggingSystem {
    /// 初始化日志系统
    ///
    /// # 参数
    /// * `config` - 日志配置
    ///
    /// # 返回
    /// * `Result<LoggingSystem, anyhow::Error>` - 初始化结果
    ///
    /// # 特性
    /// - 线程安全的单次初始化
    /// - 支持测试环境重新初始化
    pub fn setup_logging(config: LogConfig) -> anyhow::Result<Self> {
        Self::setup_logging_with_options(config, false)
    }

    /// 初始化日志系统（带选项）
    ///
    /// # 参数
    /// * `config` - 日志配置
    /// * `force_reinit` - 是否强制重新初始化（主要用于测试）
    pub fn setup_logging_with_options(
        config: LogConfig,
        force_reinit: bool,
    ) -> anyhow::Result<Self> {
        let state_mutex =
            GLOBAL_LOGGING_STATE.get_or_init(|| Mutex::new(GlobalLoggingState::default()));

        {
            let state = state_mutex.lock();
            if state.initialized && !force_reinit {
                // 已经初始化过，沿用之前的结果
                return match &state.init_result {
                    Ok(()) => Ok(Self { config }),
                    Err(e) => Err(anyhow::anyhow!("日志系统之前初始化失败: {}", e)),
                };
            }
        }

        let init_result = Self::perform_initialization(&config);

        {
            let mut state = state_mutex.lock();
            state.initialized = true;
            state.current_config = Some(config.clone());
            state.init_result = init_result.as_ref().map(|_| ()).map_err(|e| e.to_string());
        }

        init_result?;
        Ok(Self { config })
    }

    /// 当前日志配置
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// 执行实际的日志系统初始化
    fn perform_initialization(config: &LogConfig) -> anyhow::Result<()> {
        // log crate 到 tracing 的桥接
        Self::init_log_tracer()?;
        Self::init_tracing_subscriber(config)?;
        Ok(())
    }

    /// 初始化 LogTracer
    fn init_log_tracer() -> anyhow::Result<()> {
        use tracing_log::LogTracer;

        static LOG_TRACER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

        let result = LOG_TRACER_INIT.get_or_init(|| LogTracer::init().map_err(|e| e.to_string()));

        result
            .as_ref()
            .map_err(|e| anyhow::anyhow!("LogTracer初始化失败: {}", e))?;
        Ok(())
    }

    /// 初始化 tracing subscriber
    fn init_tracing_subscriber(config: &LogConfig) -> anyhow::Result<()> {
        let mut env_filter =
            EnvFilter::from_default_env().add_directive(Self::convert_level_to_directive(config.level));

        for (module, level) in &config.module_levels {
            match format!("{}={}", module, Self::level_to_string(*level)).parse::<Directive>() {
                Ok(directive) => env_filter = env_filter.add_directive(directive),
                Err(e) => eprintln!("忽略无效的模块日志级别 {module}: {e}"),
            }
        }

        let fmt_layer = if config.json_format {
            tracing_fmt::layer()
                .json()
                .with_timer(tracing_fmt::time::ChronoUtc::rfc_3339())
                .with_file(true)
                .with_line_number(true)
                .boxed()
        } else {
            tracing_fmt::layer()
                .with_timer(tracing_fmt::time::ChronoUtc::rfc_3339())
                .with_ansi(true)
                .with_thread_names(true)
                .boxed()
        };

        let result = if config.console {
            registry().with(env_filter).with(fmt_layer).try_init()
        } else if let Some(file_path) = &config.file_path {
            if let Some(parent) = file_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| anyhow::anyhow!("创建日志目录失败: {}", e))?;
            }
            let file = std::fs::File::create(file_path)
                .map_err(|e| anyhow::anyhow!("创建日志文件失败: {}", e))?;
            let file_layer = tracing_fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true);

            registry().with(env_filter).with(file_layer).try_init()
        } else {
            registry().with(env_filter).with(fmt_layer).try_init()
        };

        match result {
            Ok(()) => {
                tracing::info!("日志系统初始化完成");
                tracing::debug!("日志配置: {:?}", config);
                Ok(())
            }
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains(
                    "attempted to set a logger after the logging system was already initialized",
                ) || error_msg.contains("a global default trace dispatcher has already been set")
                {
                    // 宿主或测试已经安装了 subscriber
                    tracing::debug!("日志系统已经初始化过了");
                    Ok(())
                } else {
                    Err(anyhow::anyhow!(
                        "tracing subscriber初始化失败: {}",
                        error_msg
                    ))
                }
            }
        }
    }

    /// 将 log::LevelFilter 转换为 tracing 的指令
    fn convert_level_to_directive(level: LevelFilter) -> Directive {
        use tracing_subscriber::filter::LevelFilter as TracingLevel;
        match level {
            LevelFilter::Off => Directive::from(TracingLevel::OFF),
            LevelFilter::Error => Directive::from(Level::ERROR),
            LevelFilter::Warn => Directive::from(Level::WARN),
            LevelFilter::Info => Directive::from(Level::INFO),
            LevelFilter::Debug => Directive::from(Level::DEBUG),
            LevelFilter::Trace => Directive::from(Level::TRACE),
        }
    }

    /// 将 log::LevelFilter 转换为字符串
    fn level_to_string(level: LevelFilter) -> &'static str {
        match level {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        }
    }

    /// 检查日志系统是否已初始化
    pub fn is_initialized() -> bool {
        GLOBAL_LOGGING_STATE
            .get()
            .map(|state| state.lock().initialized)
            .unwrap_or(false)
    }

    /// 获取当前日志配置（如果已初始化）
    pub fn current_config() -> Option<LogConfig> {
        GLOBAL_LOGGING_STATE
            .get()
            .and_then(|state| state.lock().current_config.clone())
    }

    /// 重置日志系统状态（主要用于测试）
    #[cfg(test)]
    pub fn reset_for_testing() {
        if let Some(state_mutex) = GLOBAL_LOGGING_STATE.get() {
            let mut state = state_mutex.lock();
            state.initialized = false;
            state.init_result = Ok(());
            state.current_config = None;
        }
    }
}

/// 解析日志级别字符串
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

/// 插件日志句柄
///
/// 每个插件在构造时拿到自己的句柄，所有记录都带上 `plugin` 字段。
/// 消息以闭包传入，只有对应级别启用时才会生成。
#[derive(Clone)]
pub struct ModLogger {
    plugin: Arc<str>,
}

impl ModLogger {
    /// 为指定插件创建日志句柄
    pub fn new(plugin: impl Into<Arc<str>>) -> Self {
        Self {
            plugin: plugin.into(),
        }
    }

    /// 兼容层自身使用的日志句柄
    pub fn loader() -> Self {
        Self::new(crate::APP_NAME)
    }

    /// 句柄所属插件名
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn trace<F, M>(&self, message: F)
    where
        F: FnOnce() -> M,
        M: fmt::Display,
    {
        if tracing::enabled!(Level::TRACE) {
            tracing::trace!(plugin = %self.plugin, "{}", message());
        }
    }

    pub fn debug<F, M>(&self, message: F)
    where
        F: FnOnce() -> M,
        M: fmt::Display,
    {
        if tracing::enabled!(Level::DEBUG) {
            tracing::debug!(plugin = %self.plugin, "{}", message());
        }
    }

    pub fn info<F, M>(&self, message: F)
    where
        F: FnOnce() -> M,
        M: fmt::Display,
    {
        if tracing::enabled!(Level::INFO) {
            tracing::info!(plugin = %self.plugin, "{}", message());
        }
    }

    pub fn warn<F, M>(&self, message: F)
    where
        F: FnOnce() -> M,
        M: fmt::Display,
    {
        if tracing::enabled!(Level::WARN) {
            tracing::warn!(plugin = %self.plugin, "{}", message());
        }
    }

    pub fn error<F, M>(&self, message: F)
    where
        F: FnOnce() -> M,
        M: fmt::Display,
    {
        if tracing::enabled!(Level::ERROR) {
            tracing::error!(plugin = %self.plugin, "{}", message());
        }
    }
}

impl fmt::Debug for ModLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModLogger")
            .field("plugin", &self.plugin)
            .finish()
    }
}

// ===================== 日志系统测试模块 =====================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::cell::Cell;
    use tempfile::NamedTempFile;

    /// 创建测试用的日志配置
    fn create_test_config() -> LogConfig {
        LogConfig {
            level: LevelFilter::Info,
            file_path: None,
            console: true,
            json_format: false,
            module_levels: HashMap::new(),
        }
    }

    #[test]
    #[serial]
    fn test_logging_system_single_initialization() {
        LoggingSystem::reset_for_testing();

        let config = create_test_config();

        let result1 = LoggingSystem::setup_logging(config.clone());
        assert!(result1.is_ok());
        assert!(LoggingSystem::is_initialized());

        // 第二次初始化不会重复安装 subscriber
        let result2 = LoggingSystem::setup_logging(config);
        assert!(result2.is_ok());
    }

    #[test]
    #[serial]
    fn test_logging_system_with_file_output() {
        LoggingSystem::reset_for_testing();

        let temp_file = NamedTempFile::new().unwrap();
        let mut config = create_test_config();
        config.file_path = Some(temp_file.path().to_path_buf());
        config.console = false;

        assert!(LoggingSystem::setup_logging(config).is_ok());
    }

    #[test]
    #[serial]
    fn test_current_config_retrieval() {
        LoggingSystem::reset_for_testing();

        let mut config = create_test_config();
        config.json_format = true;
        config
            .module_levels
            .insert("modshim::store".to_string(), LevelFilter::Debug);
        let _system = LoggingSystem::setup_logging(config.clone()).unwrap();

        let retrieved = LoggingSystem::current_config().unwrap();
        assert_eq!(retrieved.level, config.level);
        assert!(retrieved.json_format);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("WARN"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("debug"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn test_mod_logger_is_lazy_when_level_disabled() {
        // 没有安装 subscriber 的线程上所有级别都处于关闭状态
        let logger = ModLogger::new("LazyMod");
        let rendered = Cell::new(false);
        tracing::subscriber::with_default(tracing::subscriber::NoSubscriber::default(), || {
            logger.debug(|| {
                rendered.set(true);
                "never rendered"
            });
        });
        assert!(!rendered.get());
        assert_eq!(logger.plugin(), "LazyMod");
    }
}
