//! 随二进制发布的内置工作单元，用于部署后的冒烟验证

use std::time::{Duration, Instant};

use anyhow::bail;
use taskd_core::{TaskConfig, TaskOutput, WorkUnit};

/// 原样返回任务配置
pub struct Echo;

impl WorkUnit for Echo {
    fn execute(&self, config: &TaskConfig) -> anyhow::Result<TaskOutput> {
        Ok(config.clone())
    }
}

/// 休眠 `seconds` 秒 (默认 1 秒)
pub struct Sleep;

impl WorkUnit for Sleep {
    fn execute(&self, config: &TaskConfig) -> anyhow::Result<TaskOutput> {
        let seconds = match config.get("seconds") {
            None => 1.0,
            Some(value) => match value.as_f64() {
                Some(s) if s >= 0.0 => s,
                _ => bail!("seconds 必须是非负数字: {value}"),
            },
        };

        let started = Instant::now();
        std::thread::sleep(Duration::from_secs_f64(seconds));

        let mut output = TaskOutput::new();
        output.insert(
            "slept_seconds".to_string(),
            started.elapsed().as_secs_f64().into(),
        );
        Ok(output)
    }
}
