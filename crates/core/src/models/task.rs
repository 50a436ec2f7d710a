use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::traits::WorkUnit;

/// 任务描述
///
/// 由任务发现过程生成的任务静态契约，注册后不可变。
///
/// # 字段说明
///
/// - `qualified_name`: 任务的唯一标识，格式为 `category/name`，跨重启稳定
/// - `name`: 任务在分类内的名称
/// - `category`: 分类，用于分组展示和批量操作
/// - `description`: 任务说明
/// - `default_schedule`: 默认 cron 表达式 (5 字段)，可为空
/// - `default_timeout_seconds`: 默认超时时间（秒），为空时使用引擎默认值
/// - `default_retry_count`: 默认重试次数，为空时使用引擎默认值
/// - `dependencies`: 声明的依赖，仅用于展示
/// - `source`: 任务清单文件路径
/// - `kind`: 执行方式，外部命令或内置工作单元
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub qualified_name: String,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub default_schedule: Option<String>,
    pub default_timeout_seconds: Option<u64>,
    pub default_retry_count: Option<u32>,
    pub dependencies: Vec<String>,
    pub source: PathBuf,
    pub kind: TaskKind,
}

impl TaskDescriptor {
    /// 生成任务的限定名
    pub fn qualify(category: &str, name: &str) -> String {
        format!("{category}/{name}")
    }

    /// 可序列化的元数据视图
    pub fn metadata(&self) -> TaskMetadata {
        let (kind, target) = match &self.kind {
            TaskKind::Command(spec) => ("command", spec.program.clone()),
            TaskKind::Builtin { entry, .. } => ("builtin", entry.clone()),
        };

        TaskMetadata {
            qualified_name: self.qualified_name.clone(),
            name: self.name.clone(),
            category: self.category.clone(),
            description: self.description.clone(),
            default_schedule: self.default_schedule.clone(),
            default_timeout_seconds: self.default_timeout_seconds,
            default_retry_count: self.default_retry_count,
            dependencies: self.dependencies.clone(),
            source: self.source.clone(),
            kind: kind.to_string(),
            target,
        }
    }
}

/// 任务执行方式
///
/// # 变体说明
///
/// - `Command`: 外部程序，始终在子进程中执行
/// - `Builtin`: 编译进二进制的工作单元，`entry` 为其在目录中的名称
#[derive(Clone)]
pub enum TaskKind {
    Command(CommandSpec),
    Builtin {
        entry: String,
        unit: Arc<dyn WorkUnit>,
    },
}

impl fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Command(spec) => f.debug_tuple("Command").field(spec).finish(),
            TaskKind::Builtin { entry, .. } => {
                f.debug_struct("Builtin").field("entry", entry).finish()
            }
        }
    }
}

/// 外部命令配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// 任务元数据，用于列表输出和发现结果比较
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub qualified_name: String,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub default_schedule: Option<String>,
    pub default_timeout_seconds: Option<u64>,
    pub default_retry_count: Option<u32>,
    pub dependencies: Vec<String>,
    pub source: PathBuf,
    pub kind: String,
    pub target: String,
}
