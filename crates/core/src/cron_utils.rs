use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use tracing::debug;

use crate::{SchedulerError, SchedulerResult};

const DAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// CRON表达式解析和调度工具
///
/// 接受标准 5 字段表达式 (分 时 日 月 周)，内部转换为 `cron` crate 使用的
/// 带秒字段格式。周字段沿用经典语义: `0` 和 `7` 为周日，`1` 为周一。
/// 所有计算均基于 UTC。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
}

impl CronScheduler {
    /// 创建新的CRON调度器
    pub fn new(cron_expr: &str) -> SchedulerResult<Self> {
        let normalized = normalize_expression(cron_expr)?;
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| SchedulerError::invalid_cron(cron_expr, e.to_string()))?;

        Ok(Self {
            expression: cron_expr.trim().to_string(),
            schedule,
        })
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> SchedulerResult<()> {
        Self::new(cron_expr).map(|_| ())
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 计算 `(last_fired, now]` 区间内最近的一个触发边界
    ///
    /// 调度循环被延迟时，错过的多个边界只折算为一次待触发；从未触发过的任务
    /// 只回看 `lookback` 时长，避免启动时补跑很久以前的边界。
    pub fn latest_boundary(
        &self,
        last_fired: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Option<DateTime<Utc>> {
        let check_from = last_fired.unwrap_or(now - lookback);
        if check_from >= now {
            return None;
        }

        let boundary = self
            .schedule
            .after(&check_from)
            .take_while(|t| *t <= now)
            .last();

        if let Some(b) = boundary {
            debug!(
                "任务应该触发: 表达式={}, 上次触发={:?}, 触发边界={}, 当前时间={}",
                self.expression,
                last_fired.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
                b.format("%Y-%m-%d %H:%M:%S UTC"),
                now.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        boundary
    }

    /// 获取下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 计算下次执行时间距离现在的时长
    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_execution_time(now).map(|next| next - now)
    }
}

/// 将 5 字段表达式转换为 `cron` crate 的秒优先格式
fn normalize_expression(cron_expr: &str) -> SchedulerResult<String> {
    let fields: Vec<&str> = cron_expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(SchedulerError::invalid_cron(
            cron_expr,
            format!("需要5个字段 (分 时 日 月 周)，实际为{}个", fields.len()),
        ));
    }

    let day_of_week = normalize_day_of_week(fields[4])
        .map_err(|message| SchedulerError::invalid_cron(cron_expr, message))?;

    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], day_of_week
    ))
}

fn normalize_day_of_week(field: &str) -> Result<String, String> {
    let parts = field
        .split(',')
        .map(normalize_day_of_week_part)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(","))
}

fn normalize_day_of_week_part(part: &str) -> Result<String, String> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (part, None),
    };

    let range = match range.split_once('-') {
        Some((start, end)) => {
            let start_day = day_number(start)?;
            let end_day = day_number(end)?;
            match (start_day, end_day) {
                (Some(0), Some(7)) => "SUN-SAT".to_string(),
                // 5-7 这类以周日结尾的区间在 cron crate 中会被视为跨周
                (Some(s), Some(7)) if step.is_none() => format!("{}-SAT,SUN", DAY_NAMES[s]),
                (Some(s), Some(7)) => format!("{}-SAT", DAY_NAMES[s]),
                _ => format!("{}-{}", day_name(start, start_day), day_name(end, end_day)),
            }
        }
        None => day_name(range, day_number(range)?),
    };

    Ok(match step {
        Some(step) => format!("{range}/{step}"),
        None => range,
    })
}

fn day_number(token: &str) -> Result<Option<usize>, String> {
    if token.is_empty() {
        return Err("周字段存在空值".to_string());
    }
    if !token.chars().all(|c| c.is_ascii_digit()) {
        return Ok(None);
    }
    match token.parse::<usize>() {
        Ok(n) if n <= 7 => Ok(Some(n)),
        _ => Err(format!("周字段取值超出范围 0-7: {token}")),
    }
}

fn day_name(token: &str, number: Option<usize>) -> String {
    match number {
        Some(n) => DAY_NAMES[n].to_string(),
        None => token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn test_normalize_expression() {
        assert_eq!(normalize_expression("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_expression("0 9 * * 1-5").unwrap(), "0 0 9 * * MON-FRI");
        assert_eq!(normalize_expression("0 9 * * 0,6").unwrap(), "0 0 9 * * SUN,SAT");
        assert_eq!(normalize_expression("0 9 * * 5-7").unwrap(), "0 0 9 * * FRI-SAT,SUN");
        assert_eq!(normalize_expression("0 9 * * MON").unwrap(), "0 0 9 * * MON");
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        assert!(CronScheduler::new("0 0 * * * *").is_err());
        assert!(CronScheduler::new("* * * *").is_err());
        assert!(CronScheduler::new("").is_err());
    }

    #[test]
    fn test_rejects_out_of_range_day_of_week() {
        let err = CronScheduler::new("0 0 * * 8").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    }

    #[test]
    fn test_weekday_numbering() {
        let scheduler = CronScheduler::new("0 9 * * 1").unwrap();
        // 2024-01-01 是周一
        let from = Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap();
        let next = scheduler.next_execution_time(from).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.hour(), 9);

        let sunday = CronScheduler::new("0 9 * * 0").unwrap();
        let next = sunday.next_execution_time(from).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
    }

    #[test]
    fn test_latest_boundary_collapses_missed_firings() {
        let scheduler = CronScheduler::new("* * * * *").unwrap();
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 7, 30).unwrap();

        let boundary = scheduler
            .latest_boundary(Some(last), now, Duration::seconds(60))
            .unwrap();
        assert_eq!(boundary, Utc.with_ymd_and_hms(2024, 1, 1, 10, 7, 0).unwrap());
    }

    #[test]
    fn test_latest_boundary_is_exclusive_of_last_fired() {
        let scheduler = CronScheduler::new("0 * * * *").unwrap();
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
        assert!(scheduler
            .latest_boundary(Some(last), now, Duration::seconds(60))
            .is_none());
    }

    #[test]
    fn test_never_fired_uses_lookback() {
        let scheduler = CronScheduler::new("0 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
        assert!(scheduler
            .latest_boundary(None, now, Duration::seconds(60))
            .is_none());

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 20).unwrap();
        assert_eq!(
            scheduler.latest_boundary(None, now, Duration::seconds(60)),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_time_until_next_execution() {
        let scheduler = CronScheduler::new("30 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(
            scheduler.time_until_next_execution(now),
            Some(Duration::minutes(30))
        );
    }
}
