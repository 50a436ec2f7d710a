use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use taskd_core::{SchedulerError, SchedulerResult, TaskDescriptor, TaskMetadata};

/// 单个候选任务的加载告警，不会中断整次发现
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryWarning {
    pub source: PathBuf,
    pub message: String,
}

impl fmt::Display for DiscoveryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source.display(), self.message)
    }
}

/// 一次任务发现的不可变快照
#[derive(Debug, Clone)]
pub struct Generation {
    pub id: u64,
    pub discovered_at: DateTime<Utc>,
    descriptors: BTreeMap<String, Arc<TaskDescriptor>>,
    warnings: Vec<DiscoveryWarning>,
}

impl Generation {
    pub fn empty() -> Self {
        Self {
            id: 0,
            discovered_at: Utc::now(),
            descriptors: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// 由任务描述构建快照，限定名重复时报错
    pub fn from_descriptors(
        id: u64,
        descriptors: Vec<TaskDescriptor>,
        warnings: Vec<DiscoveryWarning>,
    ) -> SchedulerResult<Self> {
        let mut map: BTreeMap<String, Arc<TaskDescriptor>> = BTreeMap::new();
        for descriptor in descriptors {
            if let Some(existing) = map.get(&descriptor.qualified_name) {
                return Err(SchedulerError::DuplicateTaskName {
                    name: descriptor.qualified_name.clone(),
                    first: existing.source.clone(),
                    second: descriptor.source.clone(),
                });
            }
            map.insert(descriptor.qualified_name.clone(), Arc::new(descriptor));
        }

        Ok(Self {
            id,
            discovered_at: Utc::now(),
            descriptors: map,
            warnings,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TaskDescriptor>> {
        self.descriptors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// 按限定名排序的任务描述
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<TaskDescriptor>> {
        self.descriptors.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn warnings(&self) -> &[DiscoveryWarning] {
        &self.warnings
    }

    pub fn by_category(&self) -> BTreeMap<&str, Vec<&Arc<TaskDescriptor>>> {
        let mut grouped: BTreeMap<&str, Vec<&Arc<TaskDescriptor>>> = BTreeMap::new();
        for descriptor in self.descriptors.values() {
            grouped
                .entry(descriptor.category.as_str())
                .or_default()
                .push(descriptor);
        }
        grouped
    }

    pub fn metadata(&self) -> Vec<TaskMetadata> {
        self.descriptors.values().map(|d| d.metadata()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskd_core::{CommandSpec, TaskKind};

    fn descriptor(category: &str, name: &str, source: &str) -> TaskDescriptor {
        TaskDescriptor {
            qualified_name: TaskDescriptor::qualify(category, name),
            name: name.to_string(),
            category: category.to_string(),
            description: None,
            default_schedule: None,
            default_timeout_seconds: None,
            default_retry_count: None,
            dependencies: vec![],
            source: PathBuf::from(source),
            kind: TaskKind::Command(CommandSpec::new("true")),
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Generation::from_descriptors(
            1,
            vec![
                descriptor("net", "scan", "a.toml"),
                descriptor("net", "scan", "b.toml"),
            ],
            vec![],
        )
        .unwrap_err();

        match err {
            SchedulerError::DuplicateTaskName { name, first, second } => {
                assert_eq!(name, "net/scan");
                assert_eq!(first, PathBuf::from("a.toml"));
                assert_eq!(second, PathBuf::from("b.toml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_group_by_category() {
        let generation = Generation::from_descriptors(
            1,
            vec![
                descriptor("net", "scan", "a.toml"),
                descriptor("backup", "git", "b.toml"),
                descriptor("net", "ping", "c.toml"),
            ],
            vec![],
        )
        .unwrap();

        let grouped = generation.by_category();
        assert_eq!(grouped.keys().copied().collect::<Vec<_>>(), vec!["backup", "net"]);
        assert_eq!(grouped["net"].len(), 2);
        assert_eq!(
            generation.names().collect::<Vec<_>>(),
            vec!["backup/git", "net/ping", "net/scan"]
        );
    }
}
