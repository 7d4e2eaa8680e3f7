use serde::Serialize;

use crate::db::DurationRecord;

use super::rounded_percent;

/// Today's persisted totals against the goal. `percentage_progress` is the
/// signed distance from the goal: -50 means halfway there, +20 means 20%
/// over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyGoalProgress {
    pub actual_minutes: u64,
    pub goal_minutes: u32,
    pub percentage_progress: i64,
    pub is_above: bool,
}

pub fn total_duration_seconds(records: &[DurationRecord]) -> u64 {
    records
        .iter()
        .fold(0u64, |total, record| total.saturating_add(record.seconds()))
}

pub fn daily_goal_progress(records: &[DurationRecord], goal_minutes: u32) -> DailyGoalProgress {
    let actual_minutes = total_duration_seconds(records) / 60;
    goal_progress_from_minutes(actual_minutes, goal_minutes)
}

pub fn goal_progress_from_minutes(actual_minutes: u64, goal_minutes: u32) -> DailyGoalProgress {
    if goal_minutes == 0 {
        return DailyGoalProgress {
            actual_minutes,
            goal_minutes,
            percentage_progress: 0,
            is_above: false,
        };
    }

    let actual = i64::try_from(actual_minutes).unwrap_or(i64::MAX);
    let goal = i64::from(goal_minutes);
    DailyGoalProgress {
        actual_minutes,
        goal_minutes,
        percentage_progress: rounded_percent(actual.saturating_sub(goal), goal),
        is_above: actual_minutes >= u64::from(goal_minutes),
    }
}
