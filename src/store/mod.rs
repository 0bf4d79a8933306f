//! 配置文档持久化
//!
//! 配置节只通过 [`DocumentStore`] 读写带版本的键值文档，具体存放位置由宿主决定。

pub mod debounce;
pub mod file;

pub use debounce::DebouncedStore;
pub use file::{DocumentFormat, FileDocumentStore};

use crate::config::version::ConfigVersion;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 文档标识：所属插件 + 配置节名
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentIdentity {
    pub owner: String,
    pub section: String,
}

impl DocumentIdentity {
    pub fn new(owner: impl Into<String>, section: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            section: section.into(),
        }
    }
}

impl fmt::Display for DocumentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.section)
    }
}

/// 持久化的配置文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    /// 写入时配置定义的版本
    pub version: ConfigVersion,
    /// 写入时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    /// 键名到原始值
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl ConfigDocument {
    /// 创建文档并记录当前时间
    pub fn new(version: ConfigVersion, values: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            version,
            saved_at: Some(Utc::now()),
            values,
        }
    }
}

/// 文档存储
///
/// `save` 可以立即写入，也可以延迟合并；延迟时只保证最后一次写入的内容最终落盘。
pub trait DocumentStore: Send + Sync {
    /// 读取文档，不存在时返回 `Ok(None)`
    fn load(&self, identity: &DocumentIdentity) -> Result<Option<ConfigDocument>, StoreError>;

    /// 写入文档
    fn save(&self, identity: &DocumentIdentity, document: ConfigDocument) -> Result<(), StoreError>;
}

/// 进程内存储，用于测试和嵌入式宿主
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<DocumentIdentity, ConfigDocument>>,
    saves: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置文档，不计入保存次数
    pub fn insert(&self, identity: DocumentIdentity, document: ConfigDocument) {
        self.documents.lock().insert(identity, document);
    }

    pub fn get(&self, identity: &DocumentIdentity) -> Option<ConfigDocument> {
        self.documents.lock().get(identity).cloned()
    }

    /// 调用 `save` 的次数
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn load(&self, identity: &DocumentIdentity) -> Result<Option<ConfigDocument>, StoreError> {
        Ok(self.get(identity))
    }

    fn save(&self, identity: &DocumentIdentity, document: ConfigDocument) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.documents.lock().insert(identity.clone(), document);
        Ok(())
    }
}
