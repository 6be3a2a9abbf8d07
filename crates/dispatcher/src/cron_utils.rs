use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::debug;

use diagnosis_core::{SchedulerError, SchedulerResult};

/// CRON表达式解析和调度工具
///
/// 同时接受五段式（分 时 日 月 周）与带秒的六/七段式表达式。
/// 五段式按传统写法解释：补上秒字段 `0`，周字段中 0 与 7 都表示周日，
/// 数字会换成英文缩写，六/七段式原样交给 `cron` 解析（周日为 1）。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    schedule: Schedule,
}

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// 把五段式表达式转换为带秒字段的格式
pub fn normalize_cron_expression(cron_expr: &str) -> String {
    let fields: Vec<&str> = cron_expr.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {} {}", fields[..4].join(" "), normalize_day_of_week(fields[4]))
    } else {
        fields.join(" ")
    }
}

/// 五段式周字段：`0-7` 的数字、区间与步长展开为星期缩写列表
fn normalize_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(day_of_week_item)
        .collect::<Vec<_>>()
        .join(",")
}

fn day_of_week_item(item: &str) -> String {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };
    let bounds = match range.split_once('-') {
        Some((start, end)) => start.parse::<u32>().ok().zip(end.parse::<u32>().ok()),
        None => range
            .parse::<u32>()
            .ok()
            .map(|day| (day, if step.is_some() { 6 } else { day })),
    };
    // `*`、`?` 与星期名称两套编号含义一致
    let Some((start, end)) = bounds else {
        return item.to_string();
    };
    let step = match step.map(str::parse::<usize>) {
        None => 1,
        Some(Ok(step)) if step > 0 => step,
        Some(_) => return item.to_string(),
    };
    if start > end || end > 7 {
        return item.to_string();
    }

    let mut days: Vec<usize> = (start..=end).step_by(step).map(|d| d as usize % 7).collect();
    days.sort_unstable();
    days.dedup();
    days.into_iter().map(|d| WEEKDAY_NAMES[d]).collect::<Vec<_>>().join(",")
}

impl CronScheduler {
    /// 创建新的CRON调度器
    pub fn new(cron_expr: &str) -> SchedulerResult<Self> {
        let normalized = normalize_cron_expression(cron_expr);
        let schedule = Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { schedule })
    }

    /// `from` 之后的下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 以 `reference` 为起点的下一次执行时间是否已经到达
    pub fn is_due(&self, reference: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.next_execution_time(reference) {
            Some(next_time) => {
                let due = next_time <= now;
                if due {
                    debug!(
                        "CRON任务到期: 起点={}, 计划时间={}, 当前时间={}",
                        reference.format("%Y-%m-%d %H:%M:%S UTC"),
                        next_time.format("%Y-%m-%d %H:%M:%S UTC"),
                        now.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
                due
            }
            None => false,
        }
    }

    /// 从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> SchedulerResult<()> {
        Self::new(cron_expr).map(|_| ())
    }
}
