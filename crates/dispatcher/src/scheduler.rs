use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use taskd_core::{
    CronScheduler, ExecutionRecord, FiringOutcome, ScheduleEntry, SchedulerError, SchedulerResult,
    TaskDescriptor, TaskState,
};
use taskd_store::ScheduleStore;
use taskd_worker::TaskRunner;
use tokio::sync::{broadcast, Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// 一次调度检查的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// 交给执行器的任务
    pub fired: Vec<String>,
    /// 上一次触发仍在运行而跳过的任务
    pub skipped_overlap: Vec<String>,
    /// 并发已满、留到下一次检查的任务
    pub deferred: Vec<String>,
    /// 已启用但尚未到期的任务数
    pub inert: usize,
}

impl TickReport {
    pub fn is_quiet(&self) -> bool {
        self.fired.is_empty() && self.skipped_overlap.is_empty() && self.deferred.is_empty()
    }
}

/// 手动触发的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    Started,
    AlreadyRunning,
    Saturated,
}

/// 任务调度器
///
/// # 字段说明
///
/// - `store`: 调度存储，每次检查读取一个完整快照
/// - `runner`: 执行一次触发 (含重试)
/// - `permits`: 全局并发信号量，许可在触发结束前一直被持有
/// - `running`: 正在运行的任务名，用于防止同一任务重叠执行
/// - `in_flight`: 所有已交出的触发
/// - `check_interval`: 检查周期
/// - `last_tick`: 上一次检查的时间，从未触发过的任务从这里开始回看
pub struct TaskScheduler {
    store: Arc<ScheduleStore>,
    runner: Arc<TaskRunner>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    running: Arc<Mutex<HashSet<String>>>,
    in_flight: AsyncMutex<JoinSet<FiringOutcome>>,
    check_interval: Duration,
    last_tick: Mutex<Option<DateTime<Utc>>>,
}

impl TaskScheduler {
    pub fn new(
        store: Arc<ScheduleStore>,
        runner: Arc<TaskRunner>,
        max_concurrent: usize,
        check_interval: Duration,
    ) -> Self {
        Self {
            store,
            runner,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            running: Arc::new(Mutex::new(HashSet::new())),
            in_flight: AsyncMutex::new(JoinSet::new()),
            check_interval,
            last_tick: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<ScheduleStore> {
        &self.store
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// 当前正在运行的触发数
    pub fn running_count(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    /// 调度主循环
    ///
    /// 每个检查周期先检测调度配置文件的外部修改，再执行一次检查。
    /// 检查本身出错 (例如状态文件无法写入) 时返回错误，由调用方终止进程。
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> SchedulerResult<()> {
        info!(
            "调度器启动: 检查间隔={}秒, 最大并发={}",
            self.check_interval.as_secs(),
            self.max_concurrent
        );

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.store.reload_if_changed().await {
                        error!("重新加载调度配置失败: {}", e);
                        return Err(e);
                    }
                    match self.tick_at(Utc::now()).await {
                        Ok(report) if report.is_quiet() => debug!("本次检查没有到期任务"),
                        Ok(report) => info!(
                            "本次检查完成: 触发={}, 重叠跳过={}, 延后={}",
                            report.fired.len(),
                            report.skipped_overlap.len(),
                            report.deferred.len()
                        ),
                        Err(e) => {
                            error!("调度检查失败: {}", e);
                            return Err(e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("调度器收到停止信号");
                    break;
                }
            }
        }

        Ok(())
    }

    /// 以给定时间执行一次调度检查
    pub async fn tick_at(&self, now: DateTime<Utc>) -> SchedulerResult<TickReport> {
        self.reap_finished().await;

        let snapshot = self.store.snapshot().await;
        let lookback = self.lookback(now);
        {
            let mut last_tick = self.last_tick.lock().unwrap_or_else(PoisonError::into_inner);
            *last_tick = (*last_tick).max(Some(now));
        }
        let mut report = TickReport::default();

        for (entry, descriptor) in snapshot.schedulable() {
            let Some(boundary) = self.due_boundary(entry, now, lookback)? else {
                report.inert += 1;
                continue;
            };
            let name = &entry.task_name;

            let Some(guard) = RunningGuard::try_acquire(&self.running, name) else {
                warn!("任务 {} 上一次触发仍在运行，跳过边界 {}", name, boundary);
                self.runner
                    .history()
                    .append(ExecutionRecord::skipped_overlap(name.as_str(), boundary));
                self.store.record_fired(name, boundary).await?;
                metrics::counter!("taskd_skipped_overlap_total").increment(1);
                report.skipped_overlap.push(name.clone());
                continue;
            };

            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                debug!("并发已满，任务 {} 留到下一次检查", name);
                metrics::counter!("taskd_deferred_total").increment(1);
                report.deferred.push(name.clone());
                continue;
            };

            self.hand_off(Arc::clone(descriptor), entry.clone(), Some(boundary), guard, permit)
                .await?;
            report.fired.push(name.clone());
        }

        Ok(report)
    }

    /// 立即触发一次，仍受重叠保护和并发上限约束
    pub async fn trigger(&self, name: &str) -> SchedulerResult<TriggerResult> {
        let snapshot = self.store.snapshot().await;
        let (Some(entry), Some(descriptor)) = (snapshot.get(name), snapshot.generation().get(name))
        else {
            return Err(SchedulerError::task_not_found(name));
        };

        // 标记与检查在同一把锁内完成，并发触发只有一个能拿到
        let Some(guard) = RunningGuard::try_acquire(&self.running, name) else {
            return Ok(TriggerResult::AlreadyRunning);
        };
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return Ok(TriggerResult::Saturated);
        };

        info!("手动触发任务 {}", name);
        self.hand_off(Arc::clone(descriptor), entry.clone(), None, guard, permit)
            .await?;
        Ok(TriggerResult::Started)
    }

    pub async fn task_state(&self, name: &str) -> SchedulerResult<TaskState> {
        self.task_state_at(name, Utc::now()).await
    }

    /// 任务在给定时间的调度状态
    pub async fn task_state_at(&self, name: &str, now: DateTime<Utc>) -> SchedulerResult<TaskState> {
        let snapshot = self.store.snapshot().await;
        let entry = snapshot
            .get(name)
            .ok_or_else(|| SchedulerError::task_not_found(name))?;

        if self.is_running(name) {
            return Ok(TaskState::Running);
        }
        if !entry.is_schedulable() {
            return Ok(TaskState::Disabled);
        }

        match self.due_boundary(entry, now, self.lookback(now))? {
            Some(_) => Ok(TaskState::Due),
            None => Ok(TaskState::Idle),
        }
    }

    /// 等待所有已交出的触发结束，超过宽限期后中止剩余的触发
    ///
    /// 返回被中止的触发数。
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.is_empty() {
            return 0;
        }

        info!(
            "等待 {} 个正在执行的任务完成 (宽限期: {}秒)",
            in_flight.len(),
            grace.as_secs()
        );

        let waited = tokio::time::timeout(grace, async {
            while let Some(joined) = in_flight.join_next().await {
                log_join_result(joined);
            }
        })
        .await;

        if waited.is_ok() {
            info!("所有正在执行的任务已完成");
            return 0;
        }

        let remaining = in_flight.len();
        warn!("宽限期已过，中止 {} 个仍在执行的任务", remaining);
        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}
        remaining
    }

    /// 从未触发过的任务的回看时长
    ///
    /// 至少一个检查周期；两次检查间隔更长 (进程挂起、检查耗时) 时一直回看到
    /// 上一次检查，期间的边界不会丢失。
    fn lookback(&self, now: DateTime<Utc>) -> chrono::Duration {
        let interval = chrono::Duration::seconds(self.check_interval.as_secs().max(1) as i64);
        let last_tick = *self.last_tick.lock().unwrap_or_else(PoisonError::into_inner);
        match last_tick {
            Some(prev) if prev < now => interval.max(now - prev),
            _ => interval,
        }
    }

    fn due_boundary(
        &self,
        entry: &ScheduleEntry,
        now: DateTime<Utc>,
        lookback: chrono::Duration,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let Some(expr) = entry.cron_expression.as_deref() else {
            return Ok(None);
        };
        let cron = CronScheduler::new(expr)?;
        Ok(cron.latest_boundary(entry.last_fired_at, now, lookback))
    }

    /// 记录触发边界，然后在独立任务中执行
    async fn hand_off(
        &self,
        descriptor: Arc<TaskDescriptor>,
        entry: ScheduleEntry,
        boundary: Option<DateTime<Utc>>,
        guard: RunningGuard,
        permit: OwnedSemaphorePermit,
    ) -> SchedulerResult<()> {
        if let Some(boundary) = boundary {
            self.store.record_fired(&entry.task_name, boundary).await?;
        }

        debug!(
            "任务 {} 已交给执行器, 当前运行数={}",
            entry.task_name,
            self.running_count()
        );

        let runner = Arc::clone(&self.runner);
        self.in_flight.lock().await.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            runner.execute(&descriptor, &entry).await
        });
        Ok(())
    }

    async fn reap_finished(&self) {
        let mut in_flight = self.in_flight.lock().await;
        while let Some(joined) = in_flight.try_join_next() {
            log_join_result(joined);
        }
    }
}

fn log_join_result(joined: Result<FiringOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => debug!(
            "任务 {} 触发结束: 状态={}, 尝试次数={}",
            outcome.task_name,
            outcome.final_status(),
            outcome.attempts()
        ),
        Err(e) if e.is_cancelled() => debug!("任务触发已被中止"),
        Err(e) => error!("任务触发异常结束: {}", e),
    }
}

/// 任务运行标记，触发结束 (包括被中止) 时自动清除
struct RunningGuard {
    name: String,
    running: Arc<Mutex<HashSet<String>>>,
}

impl RunningGuard {
    /// 任务已在运行时返回 `None`
    fn try_acquire(running: &Arc<Mutex<HashSet<String>>>, name: &str) -> Option<Self> {
        let inserted = running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
        inserted.then(|| Self {
            name: name.to_string(),
            running: Arc::clone(running),
        })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_guard_clears_on_drop() {
        let running = Arc::new(Mutex::new(HashSet::new()));
        {
            let _guard = RunningGuard::try_acquire(&running, "ops/backup").unwrap();
            assert!(running.lock().unwrap().contains("ops/backup"));
            assert!(RunningGuard::try_acquire(&running, "ops/backup").is_none());
        }
        assert!(running.lock().unwrap().is_empty());
        assert!(RunningGuard::try_acquire(&running, "ops/backup").is_some());
    }

    #[test]
    fn test_tick_report_quiet() {
        let mut report = TickReport {
            inert: 3,
            ..Default::default()
        };
        assert!(report.is_quiet());
        report.deferred.push("ops/backup".to_string());
        assert!(!report.is_quiet());
    }
}
