use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use taskd_core::{SchedulerError, SchedulerResult, TaskDescriptor, TaskKind};
use tracing::{debug, info, warn};

use crate::catalog::WorkUnitCatalog;
use crate::generation::{DiscoveryWarning, Generation};
use crate::manifest::{resolve_command, ExecuteSpec, TaskManifest};

const MANIFEST_EXTENSION: &str = "toml";

/// 任务发现
///
/// 遍历任务目录，加载每个任务清单并检查其是否满足任务契约
/// (name、category、execute)。单个候选的问题记录为告警，只有
/// 根目录不可读和限定名重复会让整次发现失败。发现过程没有副作用，
/// 输入不变时多次发现得到相同的任务集合。
#[derive(Clone)]
pub struct TaskDiscovery {
    root: PathBuf,
    catalog: Arc<WorkUnitCatalog>,
}

impl TaskDiscovery {
    pub fn new(root: impl Into<PathBuf>, catalog: Arc<WorkUnitCatalog>) -> Self {
        Self {
            root: root.into(),
            catalog,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &Arc<WorkUnitCatalog> {
        &self.catalog
    }

    /// 执行一次发现，生成编号为 `generation_id` 的快照
    pub fn discover(&self, generation_id: u64) -> SchedulerResult<Generation> {
        let mut warnings = Vec::new();
        let mut candidates = Vec::new();

        let entries = read_dir_sorted(&self.root).map_err(|e| {
            SchedulerError::Discovery(format!("无法读取任务目录 {}: {e}", self.root.display()))
        })?;
        self.collect_candidates(entries, &mut candidates, &mut warnings);

        debug!(
            "在 {} 中找到 {} 个候选任务清单",
            self.root.display(),
            candidates.len()
        );

        let mut descriptors = Vec::with_capacity(candidates.len());
        for source in candidates {
            match self.load_candidate(&source) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(message) => {
                    warn!("跳过任务清单 {}: {}", source.display(), message);
                    warnings.push(DiscoveryWarning { source, message });
                }
            }
        }

        let generation = Generation::from_descriptors(generation_id, descriptors, warnings)?;
        info!(
            "任务发现完成: generation={}, 任务数={}, 告警数={}",
            generation.id,
            generation.len(),
            generation.warnings().len()
        );
        Ok(generation)
    }

    fn collect_candidates(
        &self,
        entries: Vec<PathBuf>,
        candidates: &mut Vec<PathBuf>,
        warnings: &mut Vec<DiscoveryWarning>,
    ) {
        for path in entries {
            if is_hidden(&path) {
                continue;
            }

            if path.is_dir() {
                match read_dir_sorted(&path) {
                    Ok(children) => self.collect_candidates(children, candidates, warnings),
                    Err(e) => warnings.push(DiscoveryWarning {
                        source: path.clone(),
                        message: format!("无法读取目录: {e}"),
                    }),
                }
            } else if path.extension().and_then(|e| e.to_str()) == Some(MANIFEST_EXTENSION) {
                candidates.push(path);
            }
        }
    }

    fn load_candidate(&self, source: &Path) -> Result<TaskDescriptor, String> {
        let content = fs::read_to_string(source).map_err(|e| format!("无法读取文件: {e}"))?;
        let manifest = TaskManifest::parse(&content)?;
        manifest.validate()?;

        let category = manifest
            .resolve_category(&self.root, source)
            .ok_or_else(|| "缺少必需字段: category".to_string())?;

        let kind = match manifest.execute {
            ExecuteSpec::Command(spec) => {
                let manifest_dir = source.parent().unwrap_or(&self.root);
                TaskKind::Command(resolve_command(spec, manifest_dir))
            }
            ExecuteSpec::Builtin { entry } => {
                let unit = self
                    .catalog
                    .get(&entry)
                    .ok_or_else(|| format!("未知的内置工作单元: {entry}"))?;
                TaskKind::Builtin { entry, unit }
            }
        };

        Ok(TaskDescriptor {
            qualified_name: TaskDescriptor::qualify(&category, &manifest.name),
            name: manifest.name,
            category,
            description: manifest.description,
            default_schedule: manifest.schedule,
            default_timeout_seconds: manifest.max_runtime,
            default_retry_count: manifest.retry_count,
            dependencies: manifest.dependencies,
            source: source.to_path_buf(),
            kind,
        })
    }
}

fn read_dir_sorted(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') || n.starts_with('_'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_hidden() {
        assert!(is_hidden(Path::new("tasks/_disabled.toml")));
        assert!(is_hidden(Path::new("tasks/.git")));
        assert!(is_hidden(Path::new("tasks/__pycache__")));
        assert!(!is_hidden(Path::new("tasks/network/scan.toml")));
    }

    #[test]
    fn test_unreadable_root_is_fatal() {
        let discovery = TaskDiscovery::new(
            "/nonexistent/taskd/tasks",
            Arc::new(WorkUnitCatalog::with_builtins()),
        );
        let err = discovery.discover(1).unwrap_err();
        assert!(matches!(err, SchedulerError::Discovery(_)));
    }
}
