//! 任务清单
//!
//! 每个任务由任务目录下的一个 TOML 文件声明：
//!
//! ```toml
//! name = "subnet_scan"
//! category = "network"            # 可选，缺省取清单所在目录的相对路径
//! description = "扫描子网存活主机"
//! schedule = "*/15 * * * *"
//! max_runtime = 600
//! retry_count = 2
//!
//! [execute]
//! kind = "command"
//! program = "./scan.sh"
//! args = ["--fast"]
//! ```
//!
//! 内置工作单元使用 `kind = "builtin"` 和 `entry = "<名称>"`。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use taskd_core::{CommandSpec, CronScheduler};

/// 任务清单文件内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskManifest {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default, alias = "timeout")]
    pub max_runtime: Option<u64>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub execute: ExecuteSpec,
}

/// 执行方式声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExecuteSpec {
    Command(CommandSpec),
    Builtin { entry: String },
}

impl TaskManifest {
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("清单解析失败: {}", e.message()))
    }

    /// 检查必需的元数据
    pub fn validate(&self) -> Result<(), String> {
        validate_identifier(&self.name, "name")?;

        if let Some(category) = &self.category {
            for segment in category.split('/') {
                validate_identifier(segment, "category")?;
            }
        }

        if let Some(schedule) = &self.schedule {
            CronScheduler::validate_cron_expression(schedule).map_err(|e| e.to_string())?;
        }

        if self.max_runtime == Some(0) {
            return Err("max_runtime 必须大于 0".to_string());
        }

        match &self.execute {
            ExecuteSpec::Command(spec) if spec.program.trim().is_empty() => {
                Err("execute.program 不能为空".to_string())
            }
            ExecuteSpec::Builtin { entry } if entry.trim().is_empty() => {
                Err("execute.entry 不能为空".to_string())
            }
            _ => Ok(()),
        }
    }

    /// 未显式声明分类时，使用清单所在目录相对任务根目录的路径
    pub fn resolve_category(&self, root: &Path, source: &Path) -> Option<String> {
        if let Some(category) = &self.category {
            return Some(category.clone());
        }

        let parent = source.parent()?.strip_prefix(root).ok()?;
        let segments: Vec<String> = parent
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if segments.is_empty() {
            None
        } else {
            Some(segments.join("/"))
        }
    }
}

/// 相对路径的程序和工作目录以清单所在目录为基准
pub fn resolve_command(mut spec: CommandSpec, manifest_dir: &Path) -> CommandSpec {
    if spec.program.contains('/') && Path::new(&spec.program).is_relative() {
        spec.program = manifest_dir
            .join(&spec.program)
            .to_string_lossy()
            .into_owned();
    }

    spec.working_dir = match spec.working_dir.take() {
        Some(dir) if dir.is_relative() => Some(manifest_dir.join(dir)),
        Some(dir) => Some(dir),
        None => Some(PathBuf::from(manifest_dir)),
    };
    spec
}

fn validate_identifier(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("缺少必需字段: {field}"));
    }
    if value.contains('/') || value.chars().any(char::is_whitespace) {
        return Err(format!("{field} 包含非法字符: {value}"));
    }
    Ok(())
}
