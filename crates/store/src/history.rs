use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskd_core::{ExecutionRecord, ExecutionStatus, SchedulerResult};
use tracing::{debug, warn};

use crate::journal::{HistoryJournal, JournalWriter};

type TaskLog = Arc<Mutex<VecDeque<ExecutionRecord>>>;

/// 执行历史
///
/// 每个任务保留最近 `capacity` 条记录，超出时淘汰最旧的记录。追加只持有
/// 对应任务的锁。配置了日志文件时，每条记录同时追加写入日志；日志行数
/// 超过保留记录数的两倍时自动压缩。
pub struct ExecutionHistory {
    capacity: usize,
    tasks: RwLock<HashMap<String, TaskLog>>,
    /// 内存中保留的记录总数
    retained: AtomicUsize,
    journal: Option<HistoryJournal>,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tasks: RwLock::new(HashMap::new()),
            retained: AtomicUsize::new(0),
            journal: None,
        }
    }

    /// 创建带日志文件的执行历史，并回放已有日志
    pub fn with_journal(capacity: usize, journal: HistoryJournal) -> SchedulerResult<Self> {
        let records = journal.read_all()?;
        let mut history = Self::new(capacity);
        let replayed = records.len();
        for record in records {
            history.push_memory(record);
        }
        history.journal = Some(journal);
        debug!("已回放 {} 条执行记录", replayed);
        Ok(history)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 追加一条记录，日志写入失败只记录告警
    pub fn append(&self, record: ExecutionRecord) {
        let Some(journal) = &self.journal else {
            self.push_memory(record);
            return;
        };

        // 持有日志锁直到记录进入内存，压缩时不会丢掉并发追加的记录
        let mut writer = journal.lock();
        if let Err(e) = writer.append(&record) {
            warn!(
                "写入执行历史日志失败 {}: {}",
                journal.path().display(),
                e
            );
        }
        self.push_memory(record);

        let threshold = (self.retained.load(Ordering::SeqCst) * 2).max(self.capacity);
        if writer.lines() > threshold {
            match self.compact_locked(&mut writer) {
                Ok(removed) => debug!("执行历史日志自动压缩，移除 {} 条旧记录", removed),
                Err(e) => warn!(
                    "压缩执行历史日志失败 {}: {}",
                    journal.path().display(),
                    e
                ),
            }
        }
    }

    /// 最近的 `n` 条记录，最新的在前
    pub fn recent(&self, task_name: &str, n: usize) -> Vec<ExecutionRecord> {
        let Some(log) = self.task_log(task_name) else {
            return Vec::new();
        };
        let log = log.lock().unwrap_or_else(PoisonError::into_inner);
        log.iter().rev().take(n).cloned().collect()
    }

    pub fn task_names(&self) -> Vec<String> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// 汇总每个任务最近 `window` 条记录的执行情况
    pub fn health_summary(&self, window: usize) -> HealthSummary {
        let mut tasks = BTreeMap::new();
        let mut issues = Vec::new();

        for name in self.task_names() {
            let records = self.recent(&name, window);
            let health = TaskHealth::from_records(&records);
            if let Some(issue) = health.issue(&name) {
                issues.push(issue);
            }
            tasks.insert(name, health);
        }

        let overall = tasks
            .values()
            .map(|t| t.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        HealthSummary {
            overall,
            checked_at: Utc::now(),
            window,
            tasks,
            issues,
        }
    }

    /// 用内存中保留的记录重写日志文件，返回移除的行数
    pub fn compact(&self) -> SchedulerResult<usize> {
        let Some(journal) = &self.journal else {
            return Ok(0);
        };
        self.compact_locked(&mut journal.lock())
    }

    fn compact_locked(&self, writer: &mut JournalWriter<'_>) -> SchedulerResult<usize> {
        let before = writer.lines();
        let mut records: Vec<ExecutionRecord> = Vec::new();
        for name in self.task_names() {
            if let Some(log) = self.task_log(&name) {
                let log = log.lock().unwrap_or_else(PoisonError::into_inner);
                records.extend(log.iter().cloned());
            }
        }
        records.sort_by_key(|r| r.ended_at);

        writer.rewrite(&records)?;
        Ok(before.saturating_sub(records.len()))
    }

    fn task_log(&self, task_name: &str) -> Option<TaskLog> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        tasks.get(task_name).cloned()
    }

    fn push_memory(&self, record: ExecutionRecord) {
        let log = match self.task_log(&record.task_name) {
            Some(log) => log,
            None => {
                let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
                Arc::clone(tasks.entry(record.task_name.clone()).or_default())
            }
        };

        let mut log = log.lock().unwrap_or_else(PoisonError::into_inner);
        log.push_back(record);
        self.retained.fetch_add(1, Ordering::SeqCst);
        while log.len() > self.capacity {
            log.pop_front();
            self.retained.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// 健康状态，按严重程度排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    #[serde(rename = "healthy")]
    Healthy,
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// 单个任务的健康统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHealth {
    pub status: HealthStatus,
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub timeouts: usize,
    pub skipped_overlaps: usize,
    pub last_status: Option<ExecutionStatus>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl TaskHealth {
    /// `records` 按最新在前排列
    fn from_records(records: &[ExecutionRecord]) -> Self {
        let count = |status: ExecutionStatus| records.iter().filter(|r| r.status == status).count();
        let successes = count(ExecutionStatus::Success);
        let failures = count(ExecutionStatus::Failure);
        let timeouts = count(ExecutionStatus::Timeout);
        let skipped_overlaps = count(ExecutionStatus::SkippedOverlap);

        let last_executed = records
            .iter()
            .find(|r| r.status != ExecutionStatus::SkippedOverlap);

        let status = match last_executed {
            Some(last) if last.status.is_retryable() && successes == 0 => HealthStatus::Error,
            _ if failures + timeouts + skipped_overlaps > 0 => HealthStatus::Warning,
            _ => HealthStatus::Healthy,
        };

        Self {
            status,
            total: records.len(),
            successes,
            failures,
            timeouts,
            skipped_overlaps,
            last_status: last_executed.map(|r| r.status),
            last_run_at: last_executed.map(|r| r.started_at),
        }
    }

    fn issue(&self, name: &str) -> Option<String> {
        match self.status {
            HealthStatus::Healthy => None,
            HealthStatus::Error => Some(format!(
                "{name}: 最近{}次执行没有成功 (最后状态: {})",
                self.total,
                self.last_status.map(|s| s.as_str()).unwrap_or("unknown")
            )),
            HealthStatus::Warning => Some(format!(
                "{name}: 最近{}次执行中失败{}次, 超时{}次, 重叠跳过{}次",
                self.total, self.failures, self.timeouts, self.skipped_overlaps
            )),
        }
    }
}

/// 执行历史的健康汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub overall: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub window: usize,
    pub tasks: BTreeMap<String, TaskHealth>,
    pub issues: Vec<String>,
}

impl HealthSummary {
    pub fn is_healthy(&self) -> bool {
        self.overall == HealthStatus::Healthy
    }

    /// 合并额外的检查结果
    pub fn add_issue(&mut self, status: HealthStatus, issue: impl Into<String>) {
        self.overall = self.overall.max(status);
        self.issues.push(issue.into());
    }
}
