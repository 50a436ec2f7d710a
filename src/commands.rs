//! 命令行子命令的实现
//!
//! 每个命令返回进程退出码；错误由调用方打印并映射为退出码。

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use taskd_core::{
    CronScheduler, ExecutionRecord, ScheduleEntry, SchedulerError, TaskConfig,
};
use taskd_registry::WorkUnitCatalog;
use taskd_store::HealthStatus;

use crate::app::Application;

/// 列出当前发现的任务
pub async fn list(app: &Application, category: Option<&str>, as_json: bool) -> Result<u8> {
    let generation = app.registry().snapshot().await;
    for warning in generation.warnings() {
        eprintln!("警告: {warning}");
    }

    let metadata: Vec<_> = generation
        .metadata()
        .into_iter()
        .filter(|m| category.map_or(true, |c| m.category == c))
        .collect();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(0);
    }

    if metadata.is_empty() {
        println!("未发现任何任务");
        return Ok(0);
    }

    let mut current_category = "";
    for task in &metadata {
        if task.category != current_category {
            current_category = task.category.as_str();
            println!("[{}]", current_category);
        }
        println!(
            "  {:<32} {:<8} {:<16} {}",
            task.qualified_name,
            task.kind,
            task.default_schedule.as_deref().unwrap_or("-"),
            task.description.as_deref().unwrap_or("")
        );
    }
    println!();
    println!("共 {} 个任务", metadata.len());
    Ok(0)
}

/// 输出生效的调度配置
pub async fn schedules(app: &Application, as_json: bool) -> Result<u8> {
    let snapshot = app.store().snapshot().await;
    let now = Utc::now();

    if as_json {
        let entries: Vec<Value> = snapshot
            .entries()
            .map(|entry| -> Result<Value, serde_json::Error> {
                let mut value = serde_json::to_value(entry)?;
                value["next_due_at"] = json!(next_due(entry, now));
                Ok(value)
            })
            .collect::<Result<_, _>>()?;
        let output = json!({
            "generation": snapshot.generation().id,
            "schedules": entries,
            "orphans": snapshot.orphans(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(0);
    }

    println!(
        "{:<32} {:<6} {:<16} {:>8} {:>6} {:<20} {:<20}",
        "任务", "启用", "Cron", "超时", "重试", "上次触发", "下次触发"
    );
    println!("{}", "-".repeat(116));
    for entry in snapshot.entries() {
        println!(
            "{:<32} {:<6} {:<16} {:>7}s {:>6} {:<20} {:<20}",
            entry.task_name,
            if entry.enabled { "yes" } else { "no" },
            entry.cron_expression.as_deref().unwrap_or("-"),
            entry.timeout_seconds,
            entry.retry_count,
            format_time(entry.last_fired_at),
            format_time(next_due(entry, now)),
        );
    }

    if !snapshot.orphans().is_empty() {
        println!();
        println!("没有对应任务的调度配置 (可用 prune 清理):");
        for orphan in snapshot.orphans() {
            println!("  {orphan}");
        }
    }
    Ok(0)
}

pub async fn enable(app: &Application, name: &str) -> Result<u8> {
    let entry = app.store().enable(name).await?;
    println!(
        "任务 {} 已启用 ({})",
        entry.task_name,
        entry.cron_expression.as_deref().unwrap_or("-")
    );
    Ok(0)
}

pub async fn disable(app: &Application, name: &str) -> Result<u8> {
    let entry = app.store().disable(name).await?;
    println!("任务 {} 已禁用", entry.task_name);
    Ok(0)
}

/// 修改任务的调度
pub async fn schedule(
    app: &Application,
    name: &str,
    cron: &str,
    timeout: Option<u64>,
    retries: Option<u32>,
) -> Result<u8> {
    let entry = app.store().reschedule(name, cron, timeout, retries).await?;
    println!("任务 {} 的调度已更新", entry.task_name);
    println!("  Cron表达式: {}", cron.trim());
    println!("  超时时间: {} 秒", entry.timeout_seconds);
    println!("  重试次数: {}", entry.retry_count);

    let scheduler = CronScheduler::new(cron)?;
    let upcoming = scheduler.upcoming_times(Utc::now(), 3);
    if !upcoming.is_empty() {
        println!("  接下来的触发时间:");
        for time in upcoming {
            println!("    {}", time.format("%Y-%m-%d %H:%M UTC"));
        }
    }
    Ok(0)
}

/// 绕过调度器立即执行一次
pub async fn run(
    app: &Application,
    name: &str,
    verbose: bool,
    config_file: Option<&Path>,
) -> Result<u8> {
    let generation = app.store().snapshot().await.generation().clone();
    let descriptor = generation
        .get(name)
        .cloned()
        .ok_or_else(|| SchedulerError::task_not_found(name))?;
    let mut entry = app
        .store()
        .get(name)
        .await
        .ok_or_else(|| SchedulerError::task_not_found(name))?;

    if let Some(path) = config_file {
        entry.task_config = read_task_config(path)?;
    }

    let runner = app.runner()?;
    println!(
        "执行任务 {} (超时 {} 秒, 最多 {} 次尝试)",
        name,
        entry.timeout_seconds,
        entry.max_attempts()
    );

    let outcome = runner.execute(&descriptor, &entry).await;
    for record in &outcome.records {
        print_record(record, verbose)?;
    }

    println!(
        "执行结束: {} (firing {})",
        outcome.final_status(),
        outcome.firing_id
    );
    Ok(if outcome.is_success() { 0 } else { 1 })
}

/// 汇总执行历史的健康状态
pub async fn health(app: &Application, as_json: bool) -> Result<u8> {
    let generation = app.registry().snapshot().await;
    let mut summary = app
        .history()
        .health_summary(app.config().engine.health_window);

    if generation.is_empty() {
        summary.add_issue(HealthStatus::Warning, "未发现任何任务");
    }
    if !generation.warnings().is_empty() {
        summary.add_issue(
            HealthStatus::Warning,
            format!("{} 个任务加载失败", generation.warnings().len()),
        );
    }
    if let Err(e) = check_writable(&app.config().paths.history_file) {
        summary.add_issue(HealthStatus::Error, format!("执行历史目录不可写: {e}"));
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("整体状态: {}", summary.overall);
        println!("检查时间: {}", summary.checked_at.format("%Y-%m-%d %H:%M:%S UTC"));
        println!("统计窗口: 最近 {} 次执行", summary.window);

        if !summary.tasks.is_empty() {
            println!();
            println!(
                "{:<32} {:<8} {:>6} {:>6} {:>6} {:>6} {:<20}",
                "任务", "状态", "成功", "失败", "超时", "跳过", "最后执行"
            );
            println!("{}", "-".repeat(92));
            for (name, task) in &summary.tasks {
                println!(
                    "{:<32} {:<8} {:>6} {:>6} {:>6} {:>6} {:<20}",
                    name,
                    task.status.to_string(),
                    task.successes,
                    task.failures,
                    task.timeouts,
                    task.skipped_overlaps,
                    format_time(task.last_run_at)
                );
            }
        }

        if !summary.issues.is_empty() {
            println!();
            println!("问题:");
            for issue in &summary.issues {
                println!("  - {issue}");
            }
        }
    }

    Ok(if summary.is_healthy() { 0 } else { 1 })
}

/// 输出任务最近的执行记录
pub async fn history(app: &Application, name: &str, limit: usize, as_json: bool) -> Result<u8> {
    let known = app.registry().snapshot().await.contains(name)
        || app.history().task_names().iter().any(|n| n == name);
    if !known {
        return Err(SchedulerError::task_not_found(name).into());
    }

    let records = app.history().recent(name, limit);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(0);
    }

    if records.is_empty() {
        println!("任务 {name} 没有执行记录");
        return Ok(0);
    }
    for record in &records {
        print_record(record, false)?;
    }
    Ok(0)
}

/// 从调度配置文件中删除没有对应任务的条目
pub async fn prune(app: &Application) -> Result<u8> {
    let pruned = app.store().prune_orphans().await?;
    if pruned.is_empty() {
        println!("没有需要清理的调度配置");
    } else {
        println!("已清理 {} 个调度配置:", pruned.len());
        for name in pruned {
            println!("  {name}");
        }
    }
    Ok(0)
}

/// 子进程一侧：从 stdin 读取配置并执行内置工作单元
pub fn exec_builtin(entry: &str) -> u8 {
    let catalog = WorkUnitCatalog::with_builtins();
    let Some(unit) = catalog.get(entry) else {
        eprintln!("未知的内置工作单元: {entry}");
        return 2;
    };

    let mut input = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut input) {
        eprintln!("读取任务配置失败: {e}");
        return 2;
    }

    let code = taskd_worker::exec_builtin(
        unit.as_ref(),
        &input,
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
    );
    u8::try_from(code).unwrap_or(1)
}

fn read_task_config(path: &Path) -> Result<TaskConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("读取任务配置文件失败: {}", path.display()))?;
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(SchedulerError::Validation(format!(
            "任务配置文件 {} 必须是 JSON 对象",
            path.display()
        ))
        .into()),
        Err(e) => Err(SchedulerError::Validation(format!(
            "任务配置文件 {} 不是有效的 JSON: {e}",
            path.display()
        ))
        .into()),
    }
}

fn print_record(record: &ExecutionRecord, verbose: bool) -> Result<()> {
    let attempt = if record.attempt_number == 0 {
        "-".to_string()
    } else {
        format!("#{}", record.attempt_number)
    };
    println!(
        "{}  {:<4} {:<16} {:>8.2}s  {}",
        record.started_at.format("%Y-%m-%d %H:%M:%S"),
        attempt,
        record.status.as_str(),
        record.runtime_seconds,
        record.error_detail.as_deref().unwrap_or("")
    );

    if verbose {
        if let Some(payload) = &record.result_payload {
            println!("{}", serde_json::to_string_pretty(payload)?);
        }
    }
    Ok(())
}

fn next_due(entry: &ScheduleEntry, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !entry.is_schedulable() {
        return None;
    }
    let expr = entry.cron_expression.as_deref()?;
    CronScheduler::new(expr).ok()?.next_execution_time(now)
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn check_writable(file: &Path) -> io::Result<()> {
    let dir = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let marker = dir.join(".taskd-write-check");
    fs::write(&marker, b"")?;
    fs::remove_file(&marker)
}
