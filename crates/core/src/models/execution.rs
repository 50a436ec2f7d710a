use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::traits::TaskOutput;

/// 执行结果状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failure")]
    Failure,
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "skipped-overlap")]
    SkippedOverlap,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::SkippedOverlap => "skipped-overlap",
        }
    }

    /// 失败或超时需要按重试策略处理
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionStatus::Failure | ExecutionStatus::Timeout)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 执行记录
///
/// 一次执行尝试的不可变记录。
///
/// # 字段说明
///
/// - `firing_id`: 触发标识，同一次触发的重试共享
/// - `task_name`: 任务限定名
/// - `started_at` / `ended_at`: 尝试的起止时间
/// - `attempt_number`: 尝试序号，从 1 开始；跳过记录为 0
/// - `status`: 执行状态
/// - `result_payload`: 成功时工作单元返回的结果
/// - `error_detail`: 失败或超时的错误描述
/// - `runtime_seconds`: 实际运行时长（秒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub firing_id: Uuid,
    pub task_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub attempt_number: u32,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_payload: Option<TaskOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub runtime_seconds: f64,
}

impl ExecutionRecord {
    /// 因上一次触发仍在运行而跳过的记录
    pub fn skipped_overlap(task_name: impl Into<String>, boundary: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            firing_id: Uuid::new_v4(),
            task_name: task_name.into(),
            started_at: now,
            ended_at: now,
            attempt_number: 0,
            status: ExecutionStatus::SkippedOverlap,
            result_payload: None,
            error_detail: Some(format!(
                "上一次触发仍在运行，跳过边界 {}",
                boundary.format("%Y-%m-%d %H:%M:%S UTC")
            )),
            runtime_seconds: 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// 一次触发的完整结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiringOutcome {
    pub firing_id: Uuid,
    pub task_name: String,
    pub records: Vec<ExecutionRecord>,
}

impl FiringOutcome {
    /// 最后一次尝试的状态即为触发的最终状态
    pub fn final_status(&self) -> ExecutionStatus {
        self.records
            .last()
            .map(|r| r.status)
            .unwrap_or(ExecutionStatus::Failure)
    }

    pub fn is_success(&self) -> bool {
        self.final_status() == ExecutionStatus::Success
    }

    pub fn attempts(&self) -> usize {
        self.records.len()
    }

    pub fn last_record(&self) -> Option<&ExecutionRecord> {
        self.records.last()
    }
}

/// 任务在调度器中的状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    #[serde(rename = "DISABLED")]
    Disabled,
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "DUE")]
    Due,
    #[serde(rename = "RUNNING")]
    Running,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Disabled => "DISABLED",
            TaskState::Idle => "IDLE",
            TaskState::Due => "DUE",
            TaskState::Running => "RUNNING",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: ExecutionStatus, attempt: u32) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            firing_id: Uuid::nil(),
            task_name: "demo/echo".to_string(),
            started_at: now,
            ended_at: now,
            attempt_number: attempt,
            status,
            result_payload: None,
            error_detail: None,
            runtime_seconds: 0.0,
        }
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::SkippedOverlap).unwrap(),
            "\"skipped-overlap\""
        );
        let status: ExecutionStatus = serde_json::from_str("\"timeout\"").unwrap();
        assert_eq!(status, ExecutionStatus::Timeout);
    }

    #[test]
    fn test_final_status_is_last_attempt() {
        let outcome = FiringOutcome {
            firing_id: Uuid::nil(),
            task_name: "demo/echo".to_string(),
            records: vec![
                record(ExecutionStatus::Timeout, 1),
                record(ExecutionStatus::Success, 2),
            ],
        };
        assert_eq!(outcome.final_status(), ExecutionStatus::Success);
        assert_eq!(outcome.attempts(), 2);
    }

    #[test]
    fn test_skipped_overlap_record() {
        let record = ExecutionRecord::skipped_overlap("demo/echo", Utc::now());
        assert_eq!(record.status, ExecutionStatus::SkippedOverlap);
        assert_eq!(record.attempt_number, 0);
        assert_eq!(record.runtime_seconds, 0.0);
        assert!(!record.status.is_retryable());
    }
}
