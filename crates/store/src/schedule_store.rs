use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use taskd_core::{
    CronScheduler, EngineConfig, PathsConfig, ScheduleEntry, SchedulerError, SchedulerResult,
    TaskConfig, TaskDescriptor,
};
use taskd_registry::Generation;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::schedule_file::ScheduleFile;
use crate::state_file::SchedulerState;

/// 任务未声明超时和重试次数时使用的默认值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreDefaults {
    pub timeout_seconds: u64,
    pub retry_count: u32,
}

impl From<&EngineConfig> for StoreDefaults {
    fn from(config: &EngineConfig) -> Self {
        Self {
            timeout_seconds: config.default_timeout_seconds,
            retry_count: config.default_retry_count,
        }
    }
}

impl Default for StoreDefaults {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// 调度存储使用的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub schedules_file: PathBuf,
    pub state_file: PathBuf,
}

impl From<&PathsConfig> for StorePaths {
    fn from(config: &PathsConfig) -> Self {
        Self {
            schedules_file: config.schedules_file.clone(),
            state_file: config.state_file.clone(),
        }
    }
}

/// 将持久化配置合并到任务描述的默认值之上
///
/// 配置文件中存在的字段覆盖任务默认值，缺省字段依次回退到任务默认值和
/// 引擎默认值。没有 cron 表达式的条目不会被启用。配置文件中指向不存在
/// 任务的条目被忽略。
pub fn merge(
    generation: &Generation,
    persisted: &ScheduleFile,
    state: &SchedulerState,
    defaults: &StoreDefaults,
) -> SchedulerResult<BTreeMap<String, ScheduleEntry>> {
    let mut entries = BTreeMap::new();

    for descriptor in generation.descriptors() {
        let name = descriptor.qualified_name.clone();
        let item = persisted.get(&name).cloned().unwrap_or_default();

        let cron_expression = item.cron.or_else(|| descriptor.default_schedule.clone());
        if let Some(expr) = &cron_expression {
            CronScheduler::validate_cron_expression(expr)?;
        }
        let enabled = item.enabled.unwrap_or(true) && cron_expression.is_some();

        let entry = ScheduleEntry {
            task_name: name.clone(),
            cron_expression,
            enabled,
            timeout_seconds: item
                .max_runtime
                .or(descriptor.default_timeout_seconds)
                .unwrap_or(defaults.timeout_seconds),
            retry_count: item
                .retry_count
                .or(descriptor.default_retry_count)
                .unwrap_or(defaults.retry_count),
            task_config: item.config.unwrap_or_default(),
            last_fired_at: state.last_fired.get(&name).copied(),
        };
        entries.insert(name, entry);
    }

    Ok(entries)
}

/// 调度条目的不可变快照
#[derive(Debug, Clone)]
pub struct ScheduleSnapshot {
    pub version: u64,
    generation: Arc<Generation>,
    entries: BTreeMap<String, ScheduleEntry>,
    orphans: Vec<String>,
}

impl ScheduleSnapshot {
    pub fn generation(&self) -> &Arc<Generation> {
        &self.generation
    }

    pub fn get(&self, name: &str) -> Option<&ScheduleEntry> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.values()
    }

    /// 参与定时调度的条目及其任务描述
    pub fn schedulable(&self) -> impl Iterator<Item = (&ScheduleEntry, &Arc<TaskDescriptor>)> {
        self.entries
            .values()
            .filter(|entry| entry.is_schedulable())
            .filter_map(|entry| {
                self.generation
                    .get(&entry.task_name)
                    .map(|descriptor| (entry, descriptor))
            })
    }

    /// 配置文件中没有对应任务的条目名称
    pub fn orphans(&self) -> &[String] {
        &self.orphans
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct StoreInner {
    generation: Arc<Generation>,
    file: ScheduleFile,
    state: SchedulerState,
    file_modified: Option<SystemTime>,
    version: u64,
}

/// 调度存储
///
/// 读取方通过 [`ScheduleStore::snapshot`] 获得完整一致的快照；所有写操作
/// 串行执行，先校验、再同步写盘、最后发布新快照，任何一步失败都不会
/// 改变当前状态。
pub struct ScheduleStore {
    paths: StorePaths,
    defaults: StoreDefaults,
    current: RwLock<Arc<ScheduleSnapshot>>,
    inner: Mutex<StoreInner>,
}

impl ScheduleStore {
    pub fn open(
        generation: Arc<Generation>,
        paths: StorePaths,
        defaults: StoreDefaults,
    ) -> SchedulerResult<Self> {
        let file = ScheduleFile::load(&paths.schedules_file)?;
        let state = SchedulerState::load(&paths.state_file)?;
        let file_modified = modified_time(&paths.schedules_file);

        let snapshot = build_snapshot(1, &generation, &file, &state, &defaults)?;
        info!(
            "调度存储已加载: 条目数={}, 孤立配置={}",
            snapshot.len(),
            snapshot.orphans().len()
        );
        for orphan in snapshot.orphans() {
            warn!("调度配置 {} 没有对应的任务，已忽略", orphan);
        }

        Ok(Self {
            paths,
            defaults,
            current: RwLock::new(Arc::new(snapshot)),
            inner: Mutex::new(StoreInner {
                generation,
                file,
                state,
                file_modified,
                version: 1,
            }),
        })
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// 当前快照
    pub async fn snapshot(&self) -> Arc<ScheduleSnapshot> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn get(&self, name: &str) -> Option<ScheduleEntry> {
        self.current.read().await.get(name).cloned()
    }

    /// 设置任务的 cron 表达式
    pub async fn set_cron(&self, name: &str, expr: &str) -> SchedulerResult<ScheduleEntry> {
        CronScheduler::validate_cron_expression(expr)?;
        let expr = expr.trim().to_string();
        self.mutate_file(name, move |_, file| {
            file.entry_mut(name).cron = Some(expr);
            Ok(())
        })
        .await
    }

    /// 启用任务，任务必须有可用的 cron 表达式
    pub async fn enable(&self, name: &str) -> SchedulerResult<ScheduleEntry> {
        self.mutate_file(name, |descriptor, file| {
            let has_cron = file.get(name).and_then(|i| i.cron.as_ref()).is_some()
                || descriptor.default_schedule.is_some();
            if !has_cron {
                return Err(SchedulerError::invalid_cron("", "任务没有配置cron表达式，无法启用"));
            }
            file.entry_mut(name).enabled = Some(true);
            Ok(())
        })
        .await
    }

    pub async fn disable(&self, name: &str) -> SchedulerResult<ScheduleEntry> {
        self.mutate_file(name, |_, file| {
            file.entry_mut(name).enabled = Some(false);
            Ok(())
        })
        .await
    }

    /// 替换透传给工作单元的配置
    pub async fn set_config(&self, name: &str, config: TaskConfig) -> SchedulerResult<ScheduleEntry> {
        self.mutate_file(name, move |_, file| {
            file.entry_mut(name).config = Some(config);
            Ok(())
        })
        .await
    }

    /// 重新设置调度：cron 表达式、可选的超时和重试次数，并启用任务
    pub async fn reschedule(
        &self,
        name: &str,
        expr: &str,
        timeout_seconds: Option<u64>,
        retry_count: Option<u32>,
    ) -> SchedulerResult<ScheduleEntry> {
        CronScheduler::validate_cron_expression(expr)?;
        if timeout_seconds == Some(0) {
            return Err(SchedulerError::Validation("timeout 必须大于 0".to_string()));
        }

        let expr = expr.trim().to_string();
        self.mutate_file(name, move |_, file| {
            let item = file.entry_mut(name);
            item.cron = Some(expr);
            item.enabled = Some(true);
            if timeout_seconds.is_some() {
                item.max_runtime = timeout_seconds;
            }
            if retry_count.is_some() {
                item.retry_count = retry_count;
            }
            Ok(())
        })
        .await
    }

    /// 记录任务在交给执行器时的触发边界，并写入状态文件
    pub async fn record_fired(&self, name: &str, boundary: DateTime<Utc>) -> SchedulerResult<()> {
        let mut inner = self.inner.lock().await;

        let mut state = inner.state.clone();
        state.last_fired.insert(name.to_string(), boundary);
        state.save(&self.paths.state_file)?;

        inner.state = state;
        self.publish(&mut inner).await?;
        debug!("任务 {} 触发边界已记录: {}", name, boundary);
        Ok(())
    }

    /// 重新读取调度配置文件
    pub async fn reload(&self) -> SchedulerResult<()> {
        let mut inner = self.inner.lock().await;
        self.reload_locked(&mut inner).await
    }

    /// 配置文件修改时间变化时重新加载，返回是否发生了重新加载
    pub async fn reload_if_changed(&self) -> SchedulerResult<bool> {
        let mut inner = self.inner.lock().await;
        if modified_time(&self.paths.schedules_file) == inner.file_modified {
            return Ok(false);
        }

        info!("检测到调度配置文件变更，重新加载");
        self.reload_locked(&mut inner).await?;
        Ok(true)
    }

    /// 使用新的任务快照重新合并，已删除任务的条目随之消失
    pub async fn replace_generation(&self, generation: Arc<Generation>) -> SchedulerResult<()> {
        let mut inner = self.inner.lock().await;
        let previous = std::mem::replace(&mut inner.generation, generation);
        if let Err(e) = self.publish(&mut inner).await {
            inner.generation = previous;
            return Err(e);
        }
        Ok(())
    }

    /// 从配置文件中删除没有对应任务的条目，返回被删除的名称
    pub async fn prune_orphans(&self) -> SchedulerResult<Vec<String>> {
        let mut inner = self.inner.lock().await;

        let mut file = inner.file.clone();
        let orphans: Vec<String> = file
            .schedules
            .keys()
            .filter(|name| !inner.generation.contains(name))
            .cloned()
            .collect();
        if orphans.is_empty() {
            return Ok(orphans);
        }

        for name in &orphans {
            file.schedules.remove(name);
        }
        file.save(&self.paths.schedules_file)?;

        inner.file = file;
        inner.file_modified = modified_time(&self.paths.schedules_file);
        self.publish(&mut inner).await?;
        info!("已清理 {} 个孤立调度配置: {:?}", orphans.len(), orphans);
        Ok(orphans)
    }

    async fn mutate_file<F>(&self, name: &str, mutation: F) -> SchedulerResult<ScheduleEntry>
    where
        F: FnOnce(&TaskDescriptor, &mut ScheduleFile) -> SchedulerResult<()>,
    {
        let mut inner = self.inner.lock().await;
        let descriptor = inner
            .generation
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::task_not_found(name))?;

        let mut file = inner.file.clone();
        mutation(&descriptor, &mut file)?;

        // 写盘前先完成合并，确保写入的配置可以被加载
        let snapshot = build_snapshot(
            inner.version + 1,
            &inner.generation,
            &file,
            &inner.state,
            &self.defaults,
        )?;
        file.save(&self.paths.schedules_file)?;

        inner.file = file;
        inner.file_modified = modified_time(&self.paths.schedules_file);
        inner.version = snapshot.version;

        let entry = snapshot
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::task_not_found(name))?;
        *self.current.write().await = Arc::new(snapshot);

        info!("调度配置已更新: {}", name);
        Ok(entry)
    }

    async fn reload_locked(&self, inner: &mut StoreInner) -> SchedulerResult<()> {
        let file = ScheduleFile::load(&self.paths.schedules_file)?;
        let previous = std::mem::replace(&mut inner.file, file);
        if let Err(e) = self.publish(inner).await {
            inner.file = previous;
            return Err(e);
        }
        inner.file_modified = modified_time(&self.paths.schedules_file);
        Ok(())
    }

    async fn publish(&self, inner: &mut StoreInner) -> SchedulerResult<()> {
        let snapshot = build_snapshot(
            inner.version + 1,
            &inner.generation,
            &inner.file,
            &inner.state,
            &self.defaults,
        )?;
        inner.version = snapshot.version;
        *self.current.write().await = Arc::new(snapshot);
        Ok(())
    }
}

fn build_snapshot(
    version: u64,
    generation: &Arc<Generation>,
    file: &ScheduleFile,
    state: &SchedulerState,
    defaults: &StoreDefaults,
) -> SchedulerResult<ScheduleSnapshot> {
    let entries = merge(generation, file, state, defaults)?;
    let orphans = file
        .schedules
        .keys()
        .filter(|name| !generation.contains(name))
        .cloned()
        .collect();

    Ok(ScheduleSnapshot {
        version,
        generation: Arc::clone(generation),
        entries,
        orphans,
    })
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
