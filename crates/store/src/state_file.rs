use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskd_core::{SchedulerError, SchedulerResult};

use crate::write_atomic;

/// 调度状态文件，记录每个任务最近一次触发的边界时间
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    #[serde(default)]
    pub last_fired: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SchedulerState {
    pub fn load(path: &Path) -> SchedulerResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            SchedulerError::Configuration(format!("调度状态文件 {} 无效: {e}", path.display()))
        })
    }

    pub fn save(&mut self, path: &Path) -> SchedulerResult<()> {
        self.updated_at = Some(Utc::now());
        let content = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scheduler_state.json");

        let mut state = SchedulerState::default();
        state.last_fired.insert(
            "network/scan".to_string(),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap(),
        );
        state.save(&path).unwrap();

        let loaded = SchedulerState::load(&path).unwrap();
        assert_eq!(loaded.last_fired, state.last_fired);
        assert!(loaded.updated_at.is_some());
    }
}
