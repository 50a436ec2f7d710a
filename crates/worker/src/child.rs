//! 子进程一侧：在独立进程中执行一个内置工作单元
//!
//! 父进程通过 `<program> exec-builtin <entry>` 启动子进程，并把任务配置
//! 写入stdin。成功时结果以单行 JSON 写入stdout，失败时错误写入stderr
//! 并以非零状态退出。

use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

use taskd_core::{TaskConfig, WorkUnit};

use crate::executors::panic_message;

/// 执行内置工作单元，返回进程退出码
pub fn exec_builtin(
    unit: &dyn WorkUnit,
    config_json: &str,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let config: TaskConfig = if config_json.trim().is_empty() {
        TaskConfig::new()
    } else {
        match serde_json::from_str(config_json) {
            Ok(config) => config,
            Err(e) => {
                let _ = writeln!(stderr, "invalid task config: {e}");
                return 2;
            }
        }
    };

    match panic::catch_unwind(AssertUnwindSafe(|| unit.execute(&config))) {
        Ok(Ok(output)) => match serde_json::to_string(&output) {
            Ok(line) => {
                let _ = writeln!(stdout, "{line}");
                let _ = stdout.flush();
                0
            }
            Err(e) => {
                let _ = writeln!(stderr, "failed to serialize task output: {e}");
                1
            }
        },
        Ok(Err(e)) => {
            let _ = writeln!(stderr, "{e:#}");
            1
        }
        Err(payload) => {
            let _ = writeln!(stderr, "work unit panicked: {}", panic_message(&*payload));
            1
        }
    }
}
