use std::path::PathBuf;
use std::sync::Arc;

use taskd_core::{
    BuiltinIsolation, CommandSpec, EngineConfig, SchedulerError, SchedulerResult, TaskDescriptor,
    TaskKind,
};
use tracing::info;

use crate::executors::{AttemptExecutor, ProcessExecutor, ThreadExecutor};

/// 子进程执行内置工作单元时使用的隐藏子命令
pub const EXEC_BUILTIN_SUBCOMMAND: &str = "exec-builtin";

/// Chooses the isolation primitive for each task kind
#[derive(Debug, Clone)]
pub struct ExecutorFactory {
    builtin_isolation: BuiltinIsolation,
    builtin_program: Option<PathBuf>,
}

impl ExecutorFactory {
    /// 内置工作单元在线程中执行
    pub fn new() -> Self {
        Self {
            builtin_isolation: BuiltinIsolation::Thread,
            builtin_program: None,
        }
    }

    /// 内置工作单元通过 `<program> exec-builtin <entry>` 在子进程中执行
    pub fn with_process_isolation(program: impl Into<PathBuf>) -> Self {
        Self {
            builtin_isolation: BuiltinIsolation::Process,
            builtin_program: Some(program.into()),
        }
    }

    /// 按引擎配置创建，进程隔离时使用当前可执行文件
    pub fn from_config(config: &EngineConfig) -> SchedulerResult<Self> {
        let factory = match config.builtin_isolation {
            BuiltinIsolation::Thread => Self::new(),
            BuiltinIsolation::Process => {
                let program = std::env::current_exe().map_err(|e| {
                    SchedulerError::Configuration(format!("无法确定当前可执行文件路径: {e}"))
                })?;
                Self::with_process_isolation(program)
            }
        };
        info!(
            "Built-in work units run with {} isolation",
            factory.builtin_isolation.as_str()
        );
        Ok(factory)
    }

    pub fn builtin_isolation(&self) -> BuiltinIsolation {
        self.builtin_isolation
    }

    pub fn create(&self, descriptor: &TaskDescriptor) -> Arc<dyn AttemptExecutor> {
        match &descriptor.kind {
            TaskKind::Command(spec) => Arc::new(ProcessExecutor::new(spec.clone())),
            TaskKind::Builtin { entry, unit } => match &self.builtin_program {
                Some(program) if self.builtin_isolation == BuiltinIsolation::Process => {
                    let spec = CommandSpec::new(program.to_string_lossy())
                        .with_args([EXEC_BUILTIN_SUBCOMMAND, entry.as_str()]);
                    Arc::new(ProcessExecutor::new(spec))
                }
                _ => Arc::new(ThreadExecutor::new(Arc::clone(unit))),
            },
        }
    }
}

impl Default for ExecutorFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskd_core::{TaskConfig, TaskOutput};

    fn builtin() -> TaskDescriptor {
        let unit = |config: &TaskConfig| -> anyhow::Result<TaskOutput> { Ok(config.clone()) };
        TaskDescriptor {
            qualified_name: "ops/echo".to_string(),
            name: "echo".to_string(),
            category: "ops".to_string(),
            description: None,
            default_schedule: None,
            default_timeout_seconds: None,
            default_retry_count: None,
            dependencies: vec![],
            source: PathBuf::from("tasks/ops/echo.toml"),
            kind: TaskKind::Builtin {
                entry: "echo".to_string(),
                unit: Arc::new(unit),
            },
        }
    }

    #[test]
    fn test_builtin_isolation_selection() {
        assert_eq!(ExecutorFactory::new().create(&builtin()).name(), "thread");

        let factory = ExecutorFactory::with_process_isolation("/usr/local/bin/taskd");
        assert_eq!(factory.create(&builtin()).name(), "process");
    }

    #[test]
    fn test_command_always_uses_process() {
        let mut descriptor = builtin();
        descriptor.kind = TaskKind::Command(CommandSpec::new("true"));
        assert_eq!(ExecutorFactory::new().create(&descriptor).name(), "process");
    }
}
