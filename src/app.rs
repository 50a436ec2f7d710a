use std::sync::Arc;
use std::time::Duration;

use taskd_core::{AppConfig, SchedulerError, SchedulerResult};
use taskd_dispatcher::TaskScheduler;
use taskd_registry::{Registry, TaskDiscovery, WorkUnitCatalog};
use taskd_store::{ExecutionHistory, HistoryJournal, ScheduleStore, StoreDefaults, StorePaths};
use taskd_worker::{ExecutorFactory, TaskRunner};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::common::ReloadSignal;

/// 主应用程序
///
/// 持有注册表、调度存储和执行历史。命令行子命令和守护进程共用同一套组件。
pub struct Application {
    config: AppConfig,
    registry: Registry,
    store: Arc<ScheduleStore>,
    history: Arc<ExecutionHistory>,
}

impl Application {
    /// 发现任务、加载调度存储并回放执行历史
    pub async fn new(config: AppConfig) -> SchedulerResult<Self> {
        Self::with_catalog(config, WorkUnitCatalog::with_builtins()).await
    }

    /// 使用自定义的内置工作单元目录创建应用
    pub async fn with_catalog(config: AppConfig, catalog: WorkUnitCatalog) -> SchedulerResult<Self> {
        info!("任务目录: {}", config.paths.tasks_dir.display());

        let discovery = TaskDiscovery::new(&config.paths.tasks_dir, Arc::new(catalog));
        let registry = Registry::open(discovery)?;
        let generation = registry.snapshot().await;
        for warning in generation.warnings() {
            warn!("任务加载失败: {}", warning);
        }
        info!(
            "发现 {} 个任务 ({} 个加载失败)",
            generation.len(),
            generation.warnings().len()
        );

        let store = ScheduleStore::open(
            generation,
            StorePaths::from(&config.paths),
            StoreDefaults::from(&config.engine),
        )?;

        let journal = HistoryJournal::new(&config.paths.history_file);
        let history = ExecutionHistory::with_journal(config.engine.history_capacity, journal)?;

        Ok(Self {
            config,
            registry,
            store: Arc::new(store),
            history: Arc::new(history),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ScheduleStore> {
        &self.store
    }

    pub fn history(&self) -> &Arc<ExecutionHistory> {
        &self.history
    }

    /// 按引擎配置创建执行器
    pub fn runner(&self) -> SchedulerResult<TaskRunner> {
        let factory = ExecutorFactory::from_config(&self.config.engine)?;
        Ok(TaskRunner::new(factory, Arc::clone(&self.history)))
    }

    /// 重新发现任务并合并到调度存储
    ///
    /// 发现失败时继续使用上一代任务；合并失败说明调度配置已损坏，返回错误。
    pub async fn rediscover(&self) -> SchedulerResult<()> {
        match self.registry.rediscover().await {
            Ok(generation) => {
                for warning in generation.warnings() {
                    warn!("任务加载失败: {}", warning);
                }
                self.store.replace_generation(generation).await
            }
            Err(e) => {
                warn!("重新发现任务失败，继续使用上一代任务: {}", e);
                Ok(())
            }
        }
    }

    /// 守护进程模式：运行调度循环直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> SchedulerResult<()> {
        let engine = &self.config.engine;

        match self.history.compact() {
            Ok(removed) if removed > 0 => info!("执行历史日志已压缩，移除 {} 条旧记录", removed),
            Ok(_) => {}
            Err(e) => warn!("压缩执行历史日志失败: {}", e),
        }

        let scheduler = Arc::new(TaskScheduler::new(
            Arc::clone(&self.store),
            Arc::new(self.runner()?),
            engine.max_concurrent_tasks,
            Duration::from_secs(engine.check_interval_seconds),
        ));

        let mut scheduler_handle = {
            let scheduler = Arc::clone(&scheduler);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { scheduler.run(shutdown_rx).await })
        };

        let mut reload = ReloadSignal::new()?;
        let result = loop {
            tokio::select! {
                joined = &mut scheduler_handle => {
                    // 调度循环只会因为错误提前退出
                    break flatten_join(joined);
                }
                _ = reload.recv() => {
                    info!("收到SIGHUP信号，重新发现任务");
                    if let Err(e) = self.rediscover().await {
                        error!("重新合并调度配置失败: {}", e);
                        break Err(e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("守护进程收到关闭信号");
                    break flatten_join(scheduler_handle.await);
                }
            }
        };

        let aborted = scheduler
            .drain(Duration::from_secs(engine.shutdown_grace_seconds))
            .await;
        if aborted > 0 {
            warn!("{} 个任务在宽限期内未完成，已被中止", aborted);
        }

        info!("调度器已停止");
        result
    }
}

fn flatten_join(
    joined: Result<SchedulerResult<()>, tokio::task::JoinError>,
) -> SchedulerResult<()> {
    joined.map_err(|e| SchedulerError::Internal(format!("调度循环异常退出: {e}")))?
}
