use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use mockall::mock;
use serde_json::json;
use taskd_core::{
    CommandSpec, ExecutionStatus, ScheduleEntry, TaskConfig, TaskDescriptor, TaskKind, TaskOutput,
    WorkUnit,
};
use taskd_store::ExecutionHistory;
use taskd_worker::{ExecutorFactory, TaskRunner};

mock! {
    pub Unit {}
    impl WorkUnit for Unit {
        fn execute(&self, config: &TaskConfig) -> anyhow::Result<TaskOutput>;
    }
}

fn descriptor(name: &str, kind: TaskKind) -> TaskDescriptor {
    TaskDescriptor {
        qualified_name: format!("test/{name}"),
        name: name.to_string(),
        category: "test".to_string(),
        description: None,
        default_schedule: None,
        default_timeout_seconds: None,
        default_retry_count: None,
        dependencies: vec![],
        source: PathBuf::from(format!("tasks/test/{name}.toml")),
        kind,
    }
}

fn builtin(name: &str, unit: Arc<dyn WorkUnit>) -> TaskDescriptor {
    descriptor(
        name,
        TaskKind::Builtin {
            entry: name.to_string(),
            unit,
        },
    )
}

fn shell(name: &str, script: &str) -> TaskDescriptor {
    descriptor(
        name,
        TaskKind::Command(CommandSpec::new("sh").with_args(["-c", script])),
    )
}

fn entry(descriptor: &TaskDescriptor, timeout_seconds: u64, retry_count: u32) -> ScheduleEntry {
    ScheduleEntry {
        task_name: descriptor.qualified_name.clone(),
        cron_expression: None,
        enabled: false,
        timeout_seconds,
        retry_count,
        task_config: TaskConfig::new(),
        last_fired_at: None,
    }
}

fn runner() -> (TaskRunner, Arc<ExecutionHistory>) {
    let history = Arc::new(ExecutionHistory::new(100));
    (
        TaskRunner::new(ExecutorFactory::new(), Arc::clone(&history)),
        history,
    )
}

#[tokio::test]
async fn test_success_stores_result_payload() {
    let (runner, history) = runner();
    let unit = |config: &TaskConfig| -> anyhow::Result<TaskOutput> {
        let mut out = TaskOutput::new();
        out.insert("echo".to_string(), config["value"].clone());
        Ok(out)
    };
    let descriptor = builtin("echo", Arc::new(unit));
    let mut entry = entry(&descriptor, 5, 1);
    entry.task_config = json!({ "value": 7 }).as_object().cloned().unwrap();

    let outcome = runner.execute(&descriptor, &entry).await;

    assert_eq!(outcome.final_status(), ExecutionStatus::Success);
    assert_eq!(outcome.attempts(), 1);
    let record = outcome.last_record().unwrap();
    assert_eq!(record.attempt_number, 1);
    assert_eq!(record.result_payload.as_ref().unwrap()["echo"], 7);
    assert!(record.error_detail.is_none());
    assert_eq!(history.recent("test/echo", 10).len(), 1);
}

#[tokio::test]
async fn test_timeout_is_enforced_on_unresponsive_thread() {
    let (runner, _) = runner();
    // 不检查超时的工作单元
    let unit = |_: &TaskConfig| -> anyhow::Result<TaskOutput> {
        std::thread::sleep(Duration::from_millis(2000));
        Ok(TaskOutput::new())
    };
    let descriptor = builtin("stuck", Arc::new(unit));

    let outcome = runner.execute(&descriptor, &entry(&descriptor, 1, 0)).await;

    assert_eq!(outcome.final_status(), ExecutionStatus::Timeout);
    let record = outcome.last_record().unwrap();
    assert!(record.runtime_seconds >= 1.0);
    assert!(record.runtime_seconds < 1.5, "runtime {}", record.runtime_seconds);
    assert!(record.result_payload.is_none());
    assert!(record.error_detail.as_deref().unwrap().contains("超时"));
}

#[tokio::test]
async fn test_retry_waits_for_timed_out_thread() {
    let (runner, history) = runner();
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let unit = {
        let live = Arc::clone(&live);
        let peak = Arc::clone(&peak);
        move |_: &TaskConfig| -> anyhow::Result<TaskOutput> {
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2000));
            live.fetch_sub(1, Ordering::SeqCst);
            Ok(TaskOutput::new())
        }
    };
    let descriptor = builtin("sluggish", Arc::new(unit));

    let outcome = runner.execute(&descriptor, &entry(&descriptor, 1, 1)).await;

    assert_eq!(outcome.attempts(), 2);
    assert!(outcome
        .records
        .iter()
        .all(|r| r.status == ExecutionStatus::Timeout && r.runtime_seconds < 1.5));

    // 第二次尝试在第一个线程退出后才开始，同一时刻只有一个线程在运行
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    let gap = outcome.records[1].started_at - outcome.records[0].started_at;
    assert!(gap >= chrono::Duration::milliseconds(1900), "gap {gap}");

    // 触发结束时没有遗留的线程
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert_eq!(history.recent("test/sluggish", 10).len(), 2);
}

#[tokio::test]
async fn test_timeout_kills_process() {
    let (runner, _) = runner();
    let descriptor = shell("sleeper", "exec sleep 30");

    let outcome = runner.execute(&descriptor, &entry(&descriptor, 1, 0)).await;

    assert_eq!(outcome.final_status(), ExecutionStatus::Timeout);
    let runtime = outcome.last_record().unwrap().runtime_seconds;
    assert!(runtime >= 1.0 && runtime < 2.0, "runtime {runtime}");
}

#[tokio::test]
async fn test_retry_exhaustion_produces_one_record_per_attempt() {
    let (runner, history) = runner();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut unit = MockUnit::new();
    let counter = Arc::clone(&calls);
    unit.expect_execute().times(3).returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("connection refused"))
    });
    let descriptor = builtin("flaky", Arc::new(unit));

    let outcome = runner.execute(&descriptor, &entry(&descriptor, 5, 2)).await;

    assert_eq!(outcome.final_status(), ExecutionStatus::Failure);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let attempts: Vec<u32> = outcome.records.iter().map(|r| r.attempt_number).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(outcome
        .records
        .iter()
        .all(|r| r.status == ExecutionStatus::Failure && r.firing_id == outcome.firing_id));
    assert!(outcome.records[0]
        .error_detail
        .as_deref()
        .unwrap()
        .contains("connection refused"));

    // 重试按顺序执行，后一次尝试开始时前一次已结束
    for pair in outcome.records.windows(2) {
        assert!(pair[0].ended_at <= pair[1].started_at);
    }
    assert_eq!(history.recent("test/flaky", 10).len(), 3);
}

#[tokio::test]
async fn test_retry_stops_after_success() {
    let (runner, _) = runner();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut unit = MockUnit::new();
    let counter = Arc::clone(&calls);
    unit.expect_execute().times(2).returning(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(anyhow!("temporary failure"))
        } else {
            Ok(TaskOutput::new())
        }
    });
    let descriptor = builtin("recovering", Arc::new(unit));

    let outcome = runner.execute(&descriptor, &entry(&descriptor, 5, 5)).await;

    assert_eq!(outcome.attempts(), 2);
    assert_eq!(outcome.records[0].status, ExecutionStatus::Failure);
    assert_eq!(outcome.final_status(), ExecutionStatus::Success);
}

#[tokio::test]
async fn test_panic_is_contained() {
    let (runner, _) = runner();
    let unit = |_: &TaskConfig| -> anyhow::Result<TaskOutput> { panic!("unexpected device response") };
    let descriptor = builtin("panicky", Arc::new(unit));

    let outcome = runner.execute(&descriptor, &entry(&descriptor, 5, 0)).await;

    assert_eq!(outcome.final_status(), ExecutionStatus::Failure);
    assert!(outcome
        .last_record()
        .unwrap()
        .error_detail
        .as_deref()
        .unwrap()
        .contains("unexpected device response"));
}

#[tokio::test]
async fn test_process_receives_config_and_returns_json() {
    let (runner, _) = runner();
    let descriptor = shell("cat", "echo 'starting'; cat; echo");
    let mut entry = entry(&descriptor, 5, 0);
    entry.task_config = json!({ "subnet": "10.0.0.0/24" }).as_object().cloned().unwrap();

    let outcome = runner.execute(&descriptor, &entry).await;

    assert_eq!(outcome.final_status(), ExecutionStatus::Success);
    let payload = outcome.last_record().unwrap().result_payload.clone().unwrap();
    assert_eq!(payload["subnet"], "10.0.0.0/24");
}

#[tokio::test]
async fn test_process_environment() {
    let (runner, _) = runner();
    let descriptor = shell("env", "echo \"{\\\"name\\\": \\\"$TASKD_TASK_NAME\\\", \\\"attempt\\\": $TASKD_ATTEMPT}\"");

    let outcome = runner.execute(&descriptor, &entry(&descriptor, 5, 0)).await;

    let payload = outcome.last_record().unwrap().result_payload.clone().unwrap();
    assert_eq!(payload["name"], "test/env");
    assert_eq!(payload["attempt"], 1);
}

#[tokio::test]
async fn test_process_failure_captures_stderr() {
    let (runner, _) = runner();
    let descriptor = shell("failing", "echo 'auth failed' >&2; exit 3");

    let outcome = runner.execute(&descriptor, &entry(&descriptor, 5, 1)).await;

    assert_eq!(outcome.attempts(), 2);
    let detail = outcome.last_record().unwrap().error_detail.clone().unwrap();
    assert!(detail.contains("status 3"));
    assert!(detail.contains("auth failed"));
}

#[tokio::test]
async fn test_missing_program_is_failure() {
    let (runner, _) = runner();
    let descriptor = descriptor(
        "missing",
        TaskKind::Command(CommandSpec::new("/nonexistent/taskd-test-binary")),
    );

    let outcome = runner.execute(&descriptor, &entry(&descriptor, 5, 0)).await;
    assert_eq!(outcome.final_status(), ExecutionStatus::Failure);
}
