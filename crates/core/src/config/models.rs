use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigValidator, ValidationUtils};
use crate::{SchedulerError, SchedulerResult};

/// 调度引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 调度循环间隔（秒）
    pub check_interval_seconds: u64,
    /// 全局最大并发任务数
    pub max_concurrent_tasks: usize,
    /// 任务未声明超时时的默认值（秒）
    pub default_timeout_seconds: u64,
    /// 任务未声明重试次数时的默认值
    pub default_retry_count: u32,
    /// 关闭时等待运行中任务的宽限期（秒）
    pub shutdown_grace_seconds: u64,
    /// 每个任务保留的执行记录数
    pub history_capacity: usize,
    /// 健康检查统计的最近记录数
    pub health_window: usize,
    /// 内置工作单元的隔离方式
    pub builtin_isolation: BuiltinIsolation,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 60,
            max_concurrent_tasks: 5,
            default_timeout_seconds: 3600,
            default_retry_count: 1,
            shutdown_grace_seconds: 30,
            history_capacity: 100,
            health_window: 10,
            builtin_isolation: BuiltinIsolation::Process,
        }
    }
}

impl ConfigValidator for EngineConfig {
    fn validate(&self) -> SchedulerResult<()> {
        ValidationUtils::validate_positive(
            self.check_interval_seconds,
            "engine.check_interval_seconds",
        )?;
        ValidationUtils::validate_count(
            self.max_concurrent_tasks,
            "engine.max_concurrent_tasks",
            1024,
        )?;
        ValidationUtils::validate_positive(
            self.default_timeout_seconds,
            "engine.default_timeout_seconds",
        )?;
        ValidationUtils::validate_count(self.history_capacity, "engine.history_capacity", 100_000)?;
        ValidationUtils::validate_count(self.health_window, "engine.health_window", 100_000)?;
        Ok(())
    }
}

/// 内置工作单元的隔离方式
///
/// - `Thread`: 在独立线程中运行，超时后放弃等待
/// - `Process`: 重新启动自身二进制在子进程中运行，超时后强制终止
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuiltinIsolation {
    #[serde(rename = "thread")]
    Thread,
    #[serde(rename = "process")]
    Process,
}

impl BuiltinIsolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinIsolation::Thread => "thread",
            BuiltinIsolation::Process => "process",
        }
    }
}

/// 文件路径配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// 任务清单目录
    pub tasks_dir: PathBuf,
    /// 调度配置文件
    pub schedules_file: PathBuf,
    /// 调度状态文件
    pub state_file: PathBuf,
    /// 执行历史日志
    pub history_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            tasks_dir: PathBuf::from("tasks"),
            schedules_file: PathBuf::from("config/schedules.toml"),
            state_file: PathBuf::from("config/scheduler_state.json"),
            history_file: PathBuf::from("config/execution_history.jsonl"),
        }
    }
}

impl ConfigValidator for PathsConfig {
    fn validate(&self) -> SchedulerResult<()> {
        for (path, field) in [
            (&self.tasks_dir, "paths.tasks_dir"),
            (&self.schedules_file, "paths.schedules_file"),
            (&self.state_file, "paths.state_file"),
            (&self.history_file, "paths.history_file"),
        ] {
            ValidationUtils::validate_not_empty(&path.to_string_lossy(), field)?;
        }
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ConfigValidator for LoggingConfig {
    fn validate(&self) -> SchedulerResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(SchedulerError::Configuration(format!(
                "无效的日志级别: {}，可选值: {:?}",
                self.level, valid_levels
            )));
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(SchedulerError::Configuration(format!(
                "无效的日志格式: {}，可选值: {:?}",
                self.format, valid_formats
            )));
        }
        Ok(())
    }
}
