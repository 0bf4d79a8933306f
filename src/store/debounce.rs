//! 防抖存储
//!
//! 每个文档只有一个待写入槽位。新的保存覆盖槽位并重新计时，
//! 安静期结束后才把最后一次的内容交给内层存储。

use crate::error::StoreError;
use crate::store::{ConfigDocument, DocumentIdentity, DocumentStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error};

struct PendingWrite {
    generation: u64,
    document: ConfigDocument,
}

struct Shared<S> {
    inner: Arc<S>,
    pending: Mutex<HashMap<DocumentIdentity, PendingWrite>>,
    /// 每个文档一把写锁，同一文档的写入依次进行
    writers: Mutex<HashMap<DocumentIdentity, Arc<Mutex<()>>>>,
    next_generation: AtomicU64,
}

impl<S: DocumentStore> Shared<S> {
    fn writer_lock(&self, identity: &DocumentIdentity) -> Arc<Mutex<()>> {
        Arc::clone(self.writers.lock().entry(identity.clone()).or_default())
    }

    /// 持有写锁写入槽位中的最新文档
    ///
    /// `expected` 为 `Some` 时只有槽位仍是该代才写入，被新保存取代的写入直接放弃。
    /// 返回是否发生了写入。
    fn write_latest(
        &self,
        identity: &DocumentIdentity,
        expected: Option<u64>,
    ) -> Result<bool, StoreError> {
        let lock = self.writer_lock(identity);
        let _guard = lock.lock();

        let (generation, document) = match self.pending.lock().get(identity) {
            Some(write) if expected.map_or(true, |generation| generation == write.generation) => {
                (write.generation, write.document.clone())
            }
            _ => return Ok(false),
        };

        self.inner.save(identity, document)?;
        self.complete(identity, generation);
        Ok(true)
    }

    /// 写入后仅在槽位未被更新时清除
    fn complete(&self, identity: &DocumentIdentity, generation: u64) {
        let mut pending = self.pending.lock();
        if pending
            .get(identity)
            .is_some_and(|write| write.generation == generation)
        {
            pending.remove(identity);
        }
    }
}

/// 延迟合并写入的存储包装
pub struct DebouncedStore<S> {
    shared: Arc<Shared<S>>,
    delay: Duration,
    handle: Handle,
}

impl<S: DocumentStore + 'static> DebouncedStore<S> {
    /// 在当前 tokio 运行时上创建
    ///
    /// # 错误
    /// 当前线程不在 tokio 运行时中时返回 `StoreError::NoRuntime`
    pub fn new(inner: Arc<S>, delay: Duration) -> Result<Self, StoreError> {
        let handle = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        Ok(Self::with_handle(inner, delay, handle))
    }

    pub fn with_handle(inner: Arc<S>, delay: Duration, handle: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner,
                pending: Mutex::new(HashMap::new()),
                writers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
            delay,
            handle,
        }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.shared.inner
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// 尚未落盘的文档数
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// 立即写入所有待写文档，返回写入数量
    ///
    /// 正在进行的写入会先完成，随后写入槽位中的最新文档。
    /// 遇到错误时继续写入其余文档，失败的文档留在槽位中，返回第一个错误。
    pub fn flush(&self) -> Result<usize, StoreError> {
        let identities: Vec<DocumentIdentity> =
            self.shared.pending.lock().keys().cloned().collect();

        let mut written = 0;
        let mut first_error = None;
        for identity in identities {
            match self.shared.write_latest(&identity, None) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("写入配置文档 {} 失败: {}", identity, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    fn schedule(&self, identity: DocumentIdentity, generation: u64) {
        let shared = Arc::clone(&self.shared);
        let delay = self.delay;

        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;

            let superseded = match shared.pending.lock().get(&identity) {
                Some(write) => write.generation != generation,
                None => true,
            };
            if superseded {
                return;
            }

            let target = identity.clone();
            let result =
                tokio::task::spawn_blocking(move || shared.write_latest(&target, Some(generation)))
                    .await;

            match result {
                Ok(Ok(true)) => debug!("防抖写入完成: {}", identity),
                Ok(Ok(false)) => debug!("防抖写入已被更新的保存取代: {}", identity),
                Ok(Err(e)) => error!("防抖写入 {} 失败: {}", identity, e),
                Err(e) => error!("防抖写入任务 {} 异常退出: {}", identity, e),
            }
        });
    }
}

impl<S: DocumentStore + 'static> DocumentStore for DebouncedStore<S> {
    fn load(&self, identity: &DocumentIdentity) -> Result<Option<ConfigDocument>, StoreError> {
        if let Some(write) = self.shared.pending.lock().get(identity) {
            return Ok(Some(write.document.clone()));
        }
        self.shared.inner.load(identity)
    }

    fn save(&self, identity: &DocumentIdentity, document: ConfigDocument) -> Result<(), StoreError> {
        let generation = self.shared.next_generation.fetch_add(1, Ordering::SeqCst);
        self.shared.pending.lock().insert(
            identity.clone(),
            PendingWrite {
                generation,
                document,
            },
        );
        self.schedule(identity.clone(), generation);
        Ok(())
    }
}
