//! 进程级插件宿主
//!
//! 根据设置构建存储栈，登记插件并统一驱动它们的生命周期。

use crate::error::{Result, ShimError};
use crate::host::plugin::{LegacyMod, ModHost};
use crate::logging::ModLogger;
use crate::settings::ShimSettings;
use crate::store::{DebouncedStore, DocumentStore, FileDocumentStore};
use std::sync::Arc;

/// 兼容层宿主
pub struct ShimHost {
    settings: ShimSettings,
    store: Arc<dyn DocumentStore>,
    debounced: Option<Arc<DebouncedStore<FileDocumentStore>>>,
    mods: Vec<Arc<ModHost>>,
    logger: ModLogger,
}

impl ShimHost {
    /// 按设置创建文件存储，开启防抖时包一层 [`DebouncedStore`]
    ///
    /// # 错误
    /// 开启防抖但当前不在 tokio 运行时中时返回存储错误
    pub fn from_settings(settings: ShimSettings) -> Result<Self> {
        let root = settings.resolved_config_dir();
        let file_store = Arc::new(FileDocumentStore::new(&root, settings.document_format));
        let logger = ModLogger::loader();

        let (store, debounced) = match settings.save_debounce() {
            Some(delay) => {
                let debounced = Arc::new(DebouncedStore::new(file_store, delay)?);
                let store: Arc<dyn DocumentStore> = debounced.clone();
                (store, Some(debounced))
            }
            None => (file_store as Arc<dyn DocumentStore>, None),
        };

        logger.info(|| {
            format!(
                "配置目录: {}，格式: {:?}，防抖: {}ms",
                root.display(),
                settings.document_format,
                settings.save_debounce_ms
            )
        });

        Ok(Self {
            settings,
            store,
            debounced,
            mods: Vec::new(),
            logger,
        })
    }

    /// 使用自定义存储，不做防抖
    pub fn with_store(settings: ShimSettings, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            settings,
            store,
            debounced: None,
            mods: Vec::new(),
            logger: ModLogger::loader(),
        }
    }

    pub fn settings(&self) -> &ShimSettings {
        &self.settings
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    /// 登记插件，名称必须唯一
    pub fn register(&mut self, plugin: Arc<dyn LegacyMod>) -> Result<Arc<ModHost>> {
        if self.get(plugin.name()).is_some() {
            return Err(ShimError::Lifecycle {
                plugin: plugin.name().to_string(),
                reason: "同名插件已登记".to_string(),
            });
        }

        let host = Arc::new(ModHost::new(plugin, Arc::clone(&self.store)));
        self.logger.info(|| {
            format!(
                "登记插件 {} {} (作者: {})",
                host.full_id(),
                host.version(),
                host.author()
            )
        });
        self.mods.push(Arc::clone(&host));
        Ok(host)
    }

    pub fn mods(&self) -> &[Arc<ModHost>] {
        &self.mods
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModHost>> {
        self.mods.iter().find(|host| host.name() == name).cloned()
    }

    /// 运行所有插件，返回初始化成功的数量
    pub fn run_all(&self) -> usize {
        let mut succeeded = 0;
        for host in &self.mods {
            match host.run() {
                Ok(true) => succeeded += 1,
                Ok(false) => {}
                Err(e) => self.logger.error(|| format!("运行插件失败: {e}")),
            }
        }
        self.logger
            .info(|| format!("{}/{} 个插件初始化成功", succeeded, self.mods.len()));
        succeeded
    }

    /// 关闭所有插件并写入待保存的配置，返回是否全部成功
    pub fn shutdown_all(&self, application_exiting: bool) -> bool {
        let mut all_ok = true;
        for host in &self.mods {
            match host.shutdown(application_exiting) {
                Ok(ok) => all_ok &= ok,
                Err(e) => {
                    self.logger.error(|| format!("关闭插件失败: {e}"));
                    all_ok = false;
                }
            }
        }

        if let Err(e) = self.flush() {
            self.logger.error(|| format!("写入待保存配置失败: {e}"));
            all_ok = false;
        }
        all_ok
    }

    /// 立即写入防抖队列中的配置，返回写入数量
    pub fn flush(&self) -> Result<usize> {
        match &self.debounced {
            Some(debounced) => Ok(debounced.flush()?),
            None => Ok(0),
        }
    }

    /// 防抖队列中尚未写入的配置数
    pub fn pending_writes(&self) -> usize {
        self.debounced
            .as_ref()
            .map_or(0, |debounced| debounced.pending_count())
    }
}
