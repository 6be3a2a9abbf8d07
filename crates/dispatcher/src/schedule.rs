//! 到期判断、下次执行时间与调度优先级

use chrono::{DateTime, Duration, Utc};
use diagnosis_core::models::{DiagnosisTask, ScheduleType, BASE_PRIORITY, MAX_PRIORITY};
use tracing::warn;

use crate::cron_utils::CronScheduler;

/// 任务当前是否应该被调度
///
/// 未启用、运行中以及 `next_run_time` 尚未到达的任务都不会被选中。
pub fn should_execute(task: &DiagnosisTask, now: DateTime<Utc>) -> bool {
    if !task.is_active || task.is_running() {
        return false;
    }

    if task.next_run_time.is_some_and(|next| next > now) {
        return false;
    }

    match task.schedule_type {
        ScheduleType::Manual => false,
        ScheduleType::Once => task.total_runs == 0,
        ScheduleType::Interval => match task.last_run_time {
            None => true,
            Some(last) => now >= last + task.interval(),
        },
        ScheduleType::Cron => cron_due(task, now),
    }
}

fn cron_due(task: &DiagnosisTask, now: DateTime<Utc>) -> bool {
    let Some(expr) = task.cron_expression.as_deref() else {
        return false;
    };
    let scheduler = match CronScheduler::new(expr) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            warn!("任务 {} 的CRON表达式无效: {}", task.id, e);
            return false;
        }
    };

    match task.last_run_time {
        Some(last) => scheduler.is_due(last, now),
        // 已算出的下次执行时间通过了上面的检查，说明已到期
        None if task.next_run_time.is_some() => true,
        None => scheduler.is_due(task.created_at, now),
    }
}

/// 派发时预先写入的下次执行时间
///
/// 单次任务没有下一次，写入 `now + redispatch_guard`，避免在被Worker领取之前
/// 的下一个调度周期里重复派发。
pub fn next_run_after_dispatch(
    task: &DiagnosisTask,
    now: DateTime<Utc>,
    redispatch_guard: Duration,
) -> Option<DateTime<Utc>> {
    match task.schedule_type {
        ScheduleType::Interval => Some(now + task.interval()),
        ScheduleType::Cron => task
            .cron_expression
            .as_deref()
            .and_then(|expr| CronScheduler::new(expr).ok())
            .and_then(|scheduler| scheduler.next_execution_time(now)),
        ScheduleType::Once => Some(now + redispatch_guard),
        ScheduleType::Manual => None,
    }
}

/// CRON任务从 `now` 起的下一次执行时间，其他任务返回 `None`
pub fn next_cron_run(task: &DiagnosisTask, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if task.schedule_type != ScheduleType::Cron {
        return None;
    }
    task.cron_expression
        .as_deref()
        .and_then(|expr| CronScheduler::new(expr).ok())
        .and_then(|scheduler| scheduler.next_execution_time(now))
}

/// 根据调度延迟计算消息优先级
///
/// 延迟超过60分钟为9，超过30分钟为7，超过10分钟为6，否则为基础优先级。
pub fn dispatch_priority(task: &DiagnosisTask, now: DateTime<Utc>) -> u8 {
    let Some(planned) = task.next_run_time.filter(|t| *t < now) else {
        return BASE_PRIORITY;
    };
    let delay = now - planned;
    let priority = if delay > Duration::minutes(60) {
        9
    } else if delay > Duration::minutes(30) {
        7
    } else if delay > Duration::minutes(10) {
        6
    } else {
        BASE_PRIORITY
    };
    priority.min(MAX_PRIORITY)
}
