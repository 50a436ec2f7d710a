use std::collections::HashMap;
use std::sync::Arc;

use taskd_core::WorkUnit;

use crate::builtin;

/// 内置工作单元目录
///
/// 任务清单中 `kind = "builtin"` 的 `entry` 在这里查找。目录在启动时构建，
/// 之后只读。
#[derive(Clone, Default)]
pub struct WorkUnitCatalog {
    units: HashMap<String, Arc<dyn WorkUnit>>,
}

impl WorkUnitCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含随二进制发布的内置工作单元
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register("echo", Arc::new(builtin::Echo));
        catalog.register("sleep", Arc::new(builtin::Sleep));
        catalog
    }

    pub fn register(&mut self, entry: impl Into<String>, unit: Arc<dyn WorkUnit>) {
        self.units.insert(entry.into(), unit);
    }

    pub fn get(&self, entry: &str) -> Option<Arc<dyn WorkUnit>> {
        self.units.get(entry).cloned()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.units.contains_key(entry)
    }

    pub fn entries(&self) -> Vec<String> {
        let mut entries: Vec<String> = self.units.keys().cloned().collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
