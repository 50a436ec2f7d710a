//! 引擎配置
//!
//! 配置来源按优先级从低到高依次为：内置默认值、TOML 配置文件、
//! `TASKD_` 前缀的环境变量 (嵌套字段使用 `__` 分隔，例如
//! `TASKD_ENGINE__MAX_CONCURRENT_TASKS=8`)。

pub mod models;
pub mod validation;

use std::path::Path;

use ::config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub use models::{BuiltinIsolation, EngineConfig, LoggingConfig, PathsConfig};
pub use validation::{ConfigValidator, ValidationUtils};

use crate::{SchedulerError, SchedulerResult};

const DEFAULT_CONFIG_PATHS: [&str; 3] = ["config/taskd.toml", "taskd.toml", "/etc/taskd/taskd.toml"];

/// 应用配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 加载配置
    ///
    /// 指定的配置文件不存在时返回错误；未指定时依次尝试默认路径，
    /// 都不存在则只使用默认值和环境变量。
    pub fn load(config_path: Option<&str>) -> SchedulerResult<Self> {
        let defaults = AppConfig::default();
        let mut builder = ConfigBuilder::builder()
            .set_default(
                "engine.check_interval_seconds",
                defaults.engine.check_interval_seconds as i64,
            )?
            .set_default(
                "engine.max_concurrent_tasks",
                defaults.engine.max_concurrent_tasks as i64,
            )?
            .set_default(
                "engine.default_timeout_seconds",
                defaults.engine.default_timeout_seconds as i64,
            )?
            .set_default(
                "engine.default_retry_count",
                defaults.engine.default_retry_count as i64,
            )?
            .set_default(
                "engine.shutdown_grace_seconds",
                defaults.engine.shutdown_grace_seconds as i64,
            )?
            .set_default(
                "engine.history_capacity",
                defaults.engine.history_capacity as i64,
            )?
            .set_default("engine.health_window", defaults.engine.health_window as i64)?
            .set_default("engine.builtin_isolation", defaults.engine.builtin_isolation.as_str())?
            .set_default("paths.tasks_dir", path_default(&defaults.paths.tasks_dir))?
            .set_default(
                "paths.schedules_file",
                path_default(&defaults.paths.schedules_file),
            )?
            .set_default("paths.state_file", path_default(&defaults.paths.state_file))?
            .set_default(
                "paths.history_file",
                path_default(&defaults.paths.history_file),
            )?
            .set_default("logging.level", defaults.logging.level.as_str())?
            .set_default("logging.format", defaults.logging.format.as_str())?;

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(SchedulerError::Configuration(format!(
                        "配置文件不存在: {path}"
                    )));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                if let Some(path) = DEFAULT_CONFIG_PATHS
                    .iter()
                    .find(|path| Path::new(path).exists())
                {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TASKD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 从TOML字符串加载配置，缺省字段使用默认值
    pub fn from_toml(content: &str) -> SchedulerResult<Self> {
        let config: AppConfig = toml_from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> SchedulerResult<()> {
        self.engine.validate()?;
        self.paths.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn path_default(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn toml_from_str(content: &str) -> SchedulerResult<AppConfig> {
    ConfigBuilder::builder()
        .add_source(File::from_str(content, FileFormat::Toml))
        .build()?
        .try_deserialize()
        .map_err(SchedulerError::from)
}
