use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use taskd_core::{SchedulerError, SchedulerResult};
use tokio::sync::RwLock;
use tracing::info;

use crate::discovery::TaskDiscovery;
use crate::generation::Generation;

/// 任务注册表
///
/// 持有最新的 [`Generation`]。重新发现成功后整体替换快照，读取方拿到的
/// 始终是一个完整的快照；发现失败时保留旧快照。
pub struct Registry {
    discovery: TaskDiscovery,
    current: RwLock<Arc<Generation>>,
    next_generation: AtomicU64,
}

impl Registry {
    /// 执行首次发现并创建注册表
    pub fn open(discovery: TaskDiscovery) -> SchedulerResult<Self> {
        let generation = discovery.discover(1)?;
        Ok(Self {
            discovery,
            current: RwLock::new(Arc::new(generation)),
            next_generation: AtomicU64::new(2),
        })
    }

    /// 当前快照
    pub async fn snapshot(&self) -> Arc<Generation> {
        Arc::clone(&*self.current.read().await)
    }

    /// 重新扫描任务目录并发布新快照
    pub async fn rediscover(&self) -> SchedulerResult<Arc<Generation>> {
        let id = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let discovery = self.discovery.clone();
        let generation = tokio::task::spawn_blocking(move || discovery.discover(id))
            .await
            .map_err(|e| SchedulerError::Internal(format!("任务发现线程异常: {e}")))??;

        let generation = Arc::new(generation);
        let previous = {
            let mut current = self.current.write().await;
            std::mem::replace(&mut *current, Arc::clone(&generation))
        };

        info!(
            "注册表已更新: generation {} -> {}, 任务数 {} -> {}",
            previous.id,
            generation.id,
            previous.len(),
            generation.len()
        );
        Ok(generation)
    }

    pub fn discovery(&self) -> &TaskDiscovery {
        &self.discovery
    }
}
