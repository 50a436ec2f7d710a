use std::path::PathBuf;

use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("任务发现失败: {0}")]
    Discovery(String),

    #[error("任务名称重复: {name} (来源: {} 与 {})", first.display(), second.display())]
    DuplicateTaskName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("任务未找到: {name}")]
    TaskNotFound { name: String },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("任务执行超时: {seconds}秒")]
    ExecutionTimeout { seconds: u64 },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn invalid_cron(expr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCron {
            expr: expr.into(),
            message: message.into(),
        }
    }

    pub fn task_not_found(name: impl Into<String>) -> Self {
        Self::TaskNotFound { name: name.into() }
    }

    /// 配置或参数类错误，由调用方修正输入即可解决
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Discovery(_)
                | Self::DuplicateTaskName { .. }
                | Self::InvalidCron { .. }
                | Self::TaskNotFound { .. }
                | Self::Configuration(_)
                | Self::Validation(_)
        )
    }

    /// 任务自身的执行故障，只会出现在执行记录中
    pub fn is_task_fault(&self) -> bool {
        matches!(self, Self::TaskExecution(_) | Self::ExecutionTimeout { .. })
    }

    /// 命令行退出码: 2 表示配置/验证错误，其余为 1
    pub fn exit_code(&self) -> i32 {
        if self.is_validation_error() {
            2
        } else {
            1
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}

impl From<::config::ConfigError> for SchedulerError {
    fn from(err: ::config::ConfigError) -> Self {
        SchedulerError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_name_display_names_both_sources() {
        let err = SchedulerError::DuplicateTaskName {
            name: "network/scan".to_string(),
            first: PathBuf::from("tasks/network/scan.toml"),
            second: PathBuf::from("tasks/network/scan_v2.toml"),
        };
        let message = err.to_string();
        assert!(message.contains("network/scan"));
        assert!(message.contains("tasks/network/scan.toml"));
        assert!(message.contains("tasks/network/scan_v2.toml"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SchedulerError::task_not_found("x/y").exit_code(), 2);
        assert_eq!(SchedulerError::invalid_cron("* *", "字段数量错误").exit_code(), 2);
        assert_eq!(
            SchedulerError::Validation("timeout 必须大于 0".to_string()).exit_code(),
            2
        );
        assert_eq!(SchedulerError::Internal("boom".to_string()).exit_code(), 1);
        assert_eq!(
            SchedulerError::Io(std::io::Error::other("disk")).exit_code(),
            1
        );
    }

    #[test]
    fn test_task_fault_classification() {
        assert!(SchedulerError::ExecutionTimeout { seconds: 1 }.is_task_fault());
        assert!(SchedulerError::TaskExecution("exit 1".to_string()).is_task_fault());
        assert!(!SchedulerError::Discovery("root".to_string()).is_task_fault());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SchedulerError = json_err.into();
        assert!(matches!(err, SchedulerError::Serialization(_)));
    }
}
