use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use taskd_core::{
    ExecutionRecord, ExecutionStatus, FiringOutcome, ScheduleEntry, TaskDescriptor,
};
use taskd_store::ExecutionHistory;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::executor_factory::ExecutorFactory;
use crate::executors::{AttemptContext, AttemptOutcome};

/// 任务执行器
///
/// 执行一次触发：每次尝试在隔离单元中运行并受超时约束，失败或超时后
/// 立即重试，直到成功或用完 `retry_count`。每条尝试记录在下一次尝试
/// 开始前写入执行历史。超时的执行单元退出之后才开始下一次尝试或返回。
/// 任务的任何故障都不会传播到调用方。
pub struct TaskRunner {
    factory: ExecutorFactory,
    history: Arc<ExecutionHistory>,
}

impl TaskRunner {
    pub fn new(factory: ExecutorFactory, history: Arc<ExecutionHistory>) -> Self {
        Self { factory, history }
    }

    pub fn history(&self) -> &Arc<ExecutionHistory> {
        &self.history
    }

    pub async fn execute(&self, descriptor: &TaskDescriptor, entry: &ScheduleEntry) -> FiringOutcome {
        let firing_id = Uuid::new_v4();
        let executor = self.factory.create(descriptor);
        let max_attempts = entry.max_attempts();
        let mut records = Vec::with_capacity(max_attempts as usize);

        for attempt_number in 1..=max_attempts {
            let context = AttemptContext {
                task_name: descriptor.qualified_name.clone(),
                firing_id,
                attempt_number,
                config: entry.task_config.clone(),
                timeout: entry.timeout(),
            };

            info!(
                task = %context.task_name,
                %firing_id,
                attempt = attempt_number,
                max_attempts,
                executor = executor.name(),
                "Starting task attempt"
            );

            let started_at = Utc::now();
            let clock = Instant::now();
            let outcome = executor.execute_attempt(&context).await;
            let runtime_seconds = clock.elapsed().as_secs_f64();

            let record = build_record(&context, outcome, started_at, runtime_seconds, entry);
            log_record(&record, max_attempts);

            metrics::counter!("taskd_attempts_total", "status" => record.status.as_str())
                .increment(1);
            metrics::histogram!("taskd_attempt_duration_seconds").record(runtime_seconds);

            let status = record.status;
            self.history.append(record.clone());
            records.push(record);

            // 超时的执行单元退出前不开始下一次尝试，也不结束本次触发
            executor.settle().await;

            if status == ExecutionStatus::Success {
                break;
            }
        }

        FiringOutcome {
            firing_id,
            task_name: descriptor.qualified_name.clone(),
            records,
        }
    }
}

fn build_record(
    context: &AttemptContext,
    outcome: AttemptOutcome,
    started_at: chrono::DateTime<Utc>,
    runtime_seconds: f64,
    entry: &ScheduleEntry,
) -> ExecutionRecord {
    let (status, result_payload, error_detail) = match outcome {
        AttemptOutcome::Completed(output) => (ExecutionStatus::Success, Some(output), None),
        AttemptOutcome::Failed(detail) => (ExecutionStatus::Failure, None, Some(detail)),
        AttemptOutcome::TimedOut => (
            ExecutionStatus::Timeout,
            None,
            Some(format!("任务执行超时: {}秒", entry.timeout_seconds)),
        ),
    };

    ExecutionRecord {
        firing_id: context.firing_id,
        task_name: context.task_name.clone(),
        started_at,
        ended_at: Utc::now(),
        attempt_number: context.attempt_number,
        status,
        result_payload,
        error_detail,
        runtime_seconds,
    }
}

fn log_record(record: &ExecutionRecord, max_attempts: u32) {
    let retrying = record.status.is_retryable() && record.attempt_number < max_attempts;
    match record.status {
        ExecutionStatus::Success => info!(
            task = %record.task_name,
            firing_id = %record.firing_id,
            attempt = record.attempt_number,
            "Task attempt succeeded in {:.2}s",
            record.runtime_seconds
        ),
        _ if retrying => warn!(
            task = %record.task_name,
            firing_id = %record.firing_id,
            attempt = record.attempt_number,
            "Task attempt {} ({:.2}s), retrying immediately: {}",
            record.status,
            record.runtime_seconds,
            record.error_detail.as_deref().unwrap_or("")
        ),
        _ => error!(
            task = %record.task_name,
            firing_id = %record.firing_id,
            attempt = record.attempt_number,
            "Task firing concluded with {} after {} attempt(s): {}",
            record.status,
            record.attempt_number,
            record.error_detail.as_deref().unwrap_or("")
        ),
    }
}
