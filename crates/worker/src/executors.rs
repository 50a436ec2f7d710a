use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use taskd_core::{CommandSpec, TaskConfig, TaskOutput, WorkUnit};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 进程结束后等待输出读取完成的最长时间
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
/// 失败详情中保留的stderr行数
const STDERR_TAIL_LINES: usize = 20;

/// 单次执行尝试的上下文
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub task_name: String,
    pub firing_id: Uuid,
    pub attempt_number: u32,
    pub config: TaskConfig,
    pub timeout: Duration,
}

/// 单次执行尝试的结果
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Completed(TaskOutput),
    Failed(String),
    TimedOut,
}

/// 在隔离的执行单元中运行一次尝试
///
/// 实现必须在 `context.timeout` 到期时返回 [`AttemptOutcome::TimedOut`]，
/// 不依赖工作单元的配合。
#[async_trait]
pub trait AttemptExecutor: Send + Sync {
    async fn execute_attempt(&self, context: &AttemptContext) -> AttemptOutcome;

    /// 等待超时后仍在运行的执行单元退出
    ///
    /// 返回之前不能开始新的尝试，否则同一任务会有两个执行单元同时运行。
    async fn settle(&self) {}

    fn name(&self) -> &str;
}

/// 子进程执行器
///
/// 配置以 JSON 写入子进程 stdin，同时通过 `TASKD_TASK_CONFIG` 环境变量传递。
/// stdout 最后一行若为 JSON 对象则作为结果，否则结果为 `{"stdout": ...}`。
/// 超时后直接杀死子进程。
pub struct ProcessExecutor {
    spec: CommandSpec,
}

impl ProcessExecutor {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn build_command(&self, context: &AttemptContext, config_json: &str) -> Command {
        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .envs(&self.spec.env)
            .env("TASKD_TASK_NAME", &context.task_name)
            .env("TASKD_FIRING_ID", context.firing_id.to_string())
            .env("TASKD_ATTEMPT", context.attempt_number.to_string())
            .env("TASKD_TASK_CONFIG", config_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl AttemptExecutor for ProcessExecutor {
    async fn execute_attempt(&self, context: &AttemptContext) -> AttemptOutcome {
        let config_json = match serde_json::to_string(&context.config) {
            Ok(json) => json,
            Err(e) => return AttemptOutcome::Failed(format!("Failed to serialize task config: {e}")),
        };

        let mut child = match self.build_command(context, &config_json).spawn() {
            Ok(child) => child,
            Err(e) => {
                return AttemptOutcome::Failed(format!(
                    "Failed to spawn '{}': {e}",
                    self.spec.program
                ))
            }
        };

        debug!(
            task = %context.task_name,
            pid = ?child.id(),
            "Spawned task process: {} {:?}",
            self.spec.program,
            self.spec.args
        );

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                // 子进程不读取stdin时写入会失败，可以忽略
                let _ = stdin.write_all(config_json.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        let stdout_task = child
            .stdout
            .take()
            .map(|out| spawn_line_reader(out, context.task_name.clone(), "stdout"));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| spawn_line_reader(err, context.task_name.clone(), "stderr"));

        match tokio::time::timeout(context.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let stdout_lines = collect_lines(stdout_task).await;
                let stderr_lines = collect_lines(stderr_task).await;

                if status.success() {
                    AttemptOutcome::Completed(parse_payload(&stdout_lines))
                } else {
                    let tail = stderr_tail(&stderr_lines);
                    let detail = match (status.code(), tail.is_empty()) {
                        (Some(code), true) => format!("Process exited with status {code}"),
                        (Some(code), false) => format!("Process exited with status {code}: {tail}"),
                        (None, true) => "Process terminated by signal".to_string(),
                        (None, false) => format!("Process terminated by signal: {tail}"),
                    };
                    AttemptOutcome::Failed(detail)
                }
            }
            Ok(Err(e)) => AttemptOutcome::Failed(format!("Failed to wait for task process: {e}")),
            Err(_) => {
                warn!(
                    task = %context.task_name,
                    attempt = context.attempt_number,
                    "Task process exceeded {:?}, killing",
                    context.timeout
                );
                if let Err(e) = child.start_kill() {
                    warn!(task = %context.task_name, "Failed to kill task process: {}", e);
                }
                let _ = child.wait().await;
                abort_reader(stdout_task);
                abort_reader(stderr_task);
                AttemptOutcome::TimedOut
            }
        }
    }

    fn name(&self) -> &str {
        "process"
    }
}

/// 线程执行器
///
/// 工作单元在独立的系统线程中运行，panic 在线程边界被捕获并转换为失败。
/// 线程无法被强制终止：超时后尝试立即以超时结束，线程的结果被丢弃，
/// [`AttemptExecutor::settle`] 等到线程真正退出才返回。
pub struct ThreadExecutor {
    unit: Arc<dyn WorkUnit>,
    abandoned: Mutex<Vec<oneshot::Receiver<UnitResult>>>,
}

type UnitResult = std::thread::Result<anyhow::Result<TaskOutput>>;

impl ThreadExecutor {
    pub fn new(unit: Arc<dyn WorkUnit>) -> Self {
        Self {
            unit,
            abandoned: Mutex::new(Vec::new()),
        }
    }

    /// 超时后仍在运行的线程数
    pub fn abandoned_count(&self) -> usize {
        self.abandoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl AttemptExecutor for ThreadExecutor {
    async fn execute_attempt(&self, context: &AttemptContext) -> AttemptOutcome {
        let (tx, mut rx) = oneshot::channel();
        let unit = Arc::clone(&self.unit);
        let config = context.config.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("taskd-{}", context.task_name))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| unit.execute(&config)));
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            return AttemptOutcome::Failed(format!("Failed to spawn worker thread: {e}"));
        }

        match tokio::time::timeout(context.timeout, &mut rx).await {
            Ok(Ok(Ok(Ok(output)))) => AttemptOutcome::Completed(output),
            Ok(Ok(Ok(Err(e)))) => AttemptOutcome::Failed(format!("{e:#}")),
            Ok(Ok(Err(payload))) => {
                AttemptOutcome::Failed(format!("Work unit panicked: {}", panic_message(&*payload)))
            }
            Ok(Err(_)) => AttemptOutcome::Failed("Worker thread exited without a result".to_string()),
            Err(_) => {
                info!(
                    task = %context.task_name,
                    attempt = context.attempt_number,
                    "Worker thread exceeded {:?}, discarding its result",
                    context.timeout
                );
                self.abandoned
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(rx);
                AttemptOutcome::TimedOut
            }
        }
    }

    async fn settle(&self) {
        let abandoned = std::mem::take(
            &mut *self.abandoned.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if abandoned.is_empty() {
            return;
        }

        warn!(
            "Waiting for {} timed-out worker thread(s) to exit",
            abandoned.len()
        );
        for rx in abandoned {
            // 发送端随线程结束而关闭，无论是否发送了结果
            let _ = rx.await;
        }
        debug!("Timed-out worker threads have exited");
    }

    fn name(&self) -> &str {
        "thread"
    }
}

fn spawn_line_reader<R>(reader: R, task: String, stream: &'static str) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut collected = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(task = %task, stream, "{}", line);
            collected.push(line);
        }
        collected
    })
}

async fn collect_lines(handle: Option<JoinHandle<Vec<String>>>) -> Vec<String> {
    let Some(mut handle) = handle else {
        return Vec::new();
    };
    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut handle).await {
        Ok(Ok(lines)) => lines,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            // 后台子进程仍持有输出管道
            handle.abort();
            Vec::new()
        }
    }
}

fn abort_reader(handle: Option<JoinHandle<Vec<String>>>) {
    if let Some(handle) = handle {
        handle.abort();
    }
}

/// stdout 最后一个非空行是 JSON 对象时作为结果
pub(crate) fn parse_payload(lines: &[String]) -> TaskOutput {
    let last = lines.iter().rev().find(|l| !l.trim().is_empty());
    if let Some(line) = last {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(line.trim()) {
            return map;
        }
    }

    let mut output = TaskOutput::new();
    if !lines.is_empty() {
        output.insert("stdout".to_string(), lines.join("\n").into());
    }
    output
}

fn stderr_tail(lines: &[String]) -> String {
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n").trim().to_string()
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_payload_prefers_trailing_json_object() {
        let lines = vec![
            "scanning 10.0.0.0/24".to_string(),
            "{\"hosts\": 12}".to_string(),
            "".to_string(),
        ];
        let payload = parse_payload(&lines);
        assert_eq!(payload["hosts"], 12);
    }

    #[test]
    fn test_parse_payload_falls_back_to_stdout() {
        let lines = vec!["hello".to_string(), "[1, 2]".to_string()];
        let payload = parse_payload(&lines);
        assert_eq!(payload["stdout"], json!("hello\n[1, 2]"));
        assert!(parse_payload(&[]).is_empty());
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let lines: Vec<String> = (0..30).map(|i| format!("line {i}")).collect();
        let tail = stderr_tail(&lines);
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }

    #[tokio::test]
    async fn test_settle_waits_for_timed_out_thread() {
        let unit = |_: &TaskConfig| -> anyhow::Result<TaskOutput> {
            std::thread::sleep(Duration::from_millis(600));
            Ok(TaskOutput::new())
        };
        let executor = ThreadExecutor::new(Arc::new(unit));
        let context = AttemptContext {
            task_name: "test/slow".to_string(),
            firing_id: Uuid::new_v4(),
            attempt_number: 1,
            config: TaskConfig::new(),
            timeout: Duration::from_millis(100),
        };

        let clock = std::time::Instant::now();
        assert_eq!(executor.execute_attempt(&context).await, AttemptOutcome::TimedOut);
        assert!(clock.elapsed() < Duration::from_millis(400));
        assert_eq!(executor.abandoned_count(), 1);

        executor.settle().await;
        assert!(clock.elapsed() >= Duration::from_millis(550));
        assert_eq!(executor.abandoned_count(), 0);
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 42)).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom 42");
    }
}
