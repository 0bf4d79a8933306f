//! 配置变更通知
//!
//! 事件按三个粒度扇出：单个键、单个配置、全部配置。
//! 分发在调用 `set` 的线程上同步进行；订阅者失败会被汇总并记录一次，
//! 不会中断其余订阅者，也不会传播给触发变更的调用方。

use crate::config::key::ConfigKey;
use crate::config::section::ConfigurationSection;
use crate::error::SubscriberFault;
use crate::logging::ModLogger;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// 订阅者回调
pub type Handler<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

/// 订阅句柄，用于取消订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// 配置变更事件
#[derive(Clone)]
pub struct ConfigurationChangedEvent {
    /// 发生变更的配置
    pub configuration: Arc<ConfigurationSection>,
    /// 值发生变更的键
    pub key: ConfigKey,
    /// 修改方附加的自定义标签
    pub label: Option<String>,
}

impl fmt::Debug for ConfigurationChangedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationChangedEvent")
            .field("configuration", self.configuration.identity())
            .field("key", &self.key.name())
            .field("label", &self.label)
            .finish()
    }
}

/// 订阅者列表
///
/// 增删随时可以进行；分发前先在读锁下拍快照，分发期间新增的订阅者收不到当前事件。
pub struct Subscribers<E> {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, Handler<E>)>>,
}

impl<E> Subscribers<E> {
    /// 创建空的订阅者列表
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// 添加订阅者
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// 移除订阅者，返回是否找到
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// 把事件分发给快照中的每个订阅者
    ///
    /// 返回的错误汇总了所有返回 `Err` 或 panic 的订阅者。
    pub fn dispatch(&self, event: &E, scope: &str) -> Result<(), SubscriberFault> {
        let snapshot: Vec<Handler<E>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        let mut failures = Vec::new();
        for handler in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(format!("{e:#}")),
                Err(payload) => failures.push(panic_message(payload.as_ref())),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SubscriberFault {
                scope: scope.to_string(),
                failures,
            })
        }
    }
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}

/// 进程级的“任意配置变更”订阅者，启动时为空，随进程退出释放
static ANY_CONFIGURATION_CHANGED: OnceLock<Subscribers<ConfigurationChangedEvent>> =
    OnceLock::new();

/// 全局订阅者列表
pub fn any_configuration_changed() -> &'static Subscribers<ConfigurationChangedEvent> {
    ANY_CONFIGURATION_CHANGED.get_or_init(Subscribers::new)
}

/// 分发单个键的变更通知
pub(crate) fn fire_key_changed<T>(
    subscribers: &Subscribers<T>,
    key_name: &str,
    new_value: &T,
    logger: &ModLogger,
) {
    if let Err(fault) = subscribers.dispatch(new_value, &format!("key:{key_name}")) {
        logger.error(|| format!("配置键 [{key_name}] 的部分 OnChanged 订阅者出错: {fault}"));
    }
}

/// 先分发本配置的订阅者，再分发全局订阅者
pub(crate) fn fire_configuration_changed(
    this_configuration: &Subscribers<ConfigurationChangedEvent>,
    event: &ConfigurationChangedEvent,
    logger: &ModLogger,
) {
    if let Err(fault) = this_configuration.dispatch(event, "this-configuration") {
        logger.error(|| format!("OnThisConfigurationChanged 订阅者出错: {fault}"));
    }

    if let Err(fault) = any_configuration_changed().dispatch(event, "any-configuration") {
        logger.error(|| format!("OnAnyConfigurationChanged 订阅者出错: {fault}"));
    }
}
