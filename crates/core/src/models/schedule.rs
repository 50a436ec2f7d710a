use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::TaskConfig;

/// 调度条目
///
/// 任务的有效运行配置，每个任务描述对应一个。
///
/// # 字段说明
///
/// - `task_name`: 任务限定名
/// - `cron_expression`: 生效的 cron 表达式，覆盖任务默认值
/// - `enabled`: 是否参与定时调度
/// - `timeout_seconds`: 单次尝试的超时时间（秒）
/// - `retry_count`: 失败或超时后的最大重试次数
/// - `task_config`: 透传给工作单元的配置
/// - `last_fired_at`: 最近一次触发的边界时间
///
/// 启用的条目一定带有有效的 cron 表达式，由调度存储在写入前校验。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub task_name: String,
    pub cron_expression: Option<String>,
    pub enabled: bool,
    pub timeout_seconds: u64,
    pub retry_count: u32,
    #[serde(default)]
    pub task_config: TaskConfig,
    pub last_fired_at: Option<DateTime<Utc>>,
}

impl ScheduleEntry {
    /// 是否应被调度循环评估
    pub fn is_schedulable(&self) -> bool {
        self.enabled && self.cron_expression.is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// 一次触发的最大尝试次数
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

/// 调度配置文件中的单个任务覆盖项
///
/// 字段缺省时沿用任务描述的默认值。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(
        default,
        alias = "timeout",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_runtime: Option<u64>,
    #[serde(default, alias = "retries", skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<TaskConfig>,
}
