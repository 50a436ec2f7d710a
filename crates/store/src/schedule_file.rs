use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use taskd_core::{ScheduleOverride, SchedulerError, SchedulerResult};

use crate::write_atomic;

/// 调度配置文件
///
/// ```toml
/// [schedules."network/scan"]
/// cron = "*/15 * * * *"
/// enabled = true
/// max_runtime = 600
/// retry_count = 2
///
/// [schedules."network/scan".config]
/// subnet = "10.0.0.0/24"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleFile {
    #[serde(default)]
    pub schedules: BTreeMap<String, ScheduleOverride>,
}

impl ScheduleFile {
    /// 文件不存在时返回空配置
    pub fn load(path: &Path) -> SchedulerResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| {
            SchedulerError::Configuration(format!("调度配置文件 {} 无效: {e}", path.display()))
        })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.message().to_string())
    }

    pub fn save(&self, path: &Path) -> SchedulerResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SchedulerError::Serialization(format!("调度配置序列化失败: {e}")))?;
        write_atomic(path, content.as_bytes())?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ScheduleOverride> {
        self.schedules.get(name)
    }

    pub fn entry_mut(&mut self, name: &str) -> &mut ScheduleOverride {
        self.schedules.entry(name.to_string()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_with_aliases() {
        let file = ScheduleFile::parse(
            r#"
            [schedules."network/scan"]
            cron = "*/15 * * * *"
            enabled = false
            timeout = 120

            [schedules."network/scan".config]
            subnet = "10.0.0.0/24"
            ports = [22, 443]
            "#,
        )
        .unwrap();

        let item = file.get("network/scan").unwrap();
        assert_eq!(item.cron.as_deref(), Some("*/15 * * * *"));
        assert_eq!(item.enabled, Some(false));
        assert_eq!(item.max_runtime, Some(120));
        let config = item.config.as_ref().unwrap();
        assert_eq!(config["subnet"], "10.0.0.0/24");
        assert_eq!(config["ports"][1], 443);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let file = ScheduleFile::load(&dir.path().join("schedules.toml")).unwrap();
        assert!(file.schedules.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/schedules.toml");

        let mut file = ScheduleFile::default();
        let item = file.entry_mut("backup/git");
        item.cron = Some("0 2 * * *".to_string());
        item.retry_count = Some(3);
        file.save(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("backup/git"));
        assert_eq!(ScheduleFile::load(&path).unwrap(), file);
    }

    #[test]
    fn test_corrupt_file_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schedules.toml");
        fs::write(&path, "[schedules\nbroken").unwrap();
        let err = ScheduleFile::load(&path).unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
    }
}
