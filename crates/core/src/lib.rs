pub mod config;
pub mod cron_utils;
pub mod errors;
pub mod models;
pub mod traits;

pub use self::config::{AppConfig, BuiltinIsolation, EngineConfig, LoggingConfig, PathsConfig};
pub use cron_utils::CronScheduler;
pub use errors::*;
pub use models::{
    CommandSpec, ExecutionRecord, ExecutionStatus, FiringOutcome, ScheduleEntry,
    ScheduleOverride, TaskDescriptor, TaskKind, TaskMetadata, TaskState,
};
pub use traits::{TaskConfig, TaskOutput, WorkUnit};

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
