use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;

use crate::day_key::{get_day_key, DayKey};
use crate::db::DurationRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Streak {
    pub days: u32,
    /// Whether today already counts towards `days`.
    pub includes_today: bool,
}

/// Whole minutes logged per civil day. Seconds are summed per day first,
/// then floored, matching the daily progress rule.
pub fn minutes_by_day(records: &[DurationRecord], tz: Tz) -> BTreeMap<DayKey, u64> {
    let mut seconds: BTreeMap<DayKey, u64> = BTreeMap::new();
    for record in records {
        let total = seconds.entry(get_day_key(record.created_at, tz)).or_default();
        *total = total.saturating_add(record.seconds());
    }
    seconds
        .into_iter()
        .map(|(day, total)| (day, total / 60))
        .collect()
}

/// Consecutive days meeting `goal_minutes`, counted back from `today`.
/// An unfinished today does not break the streak; it starts from yesterday.
pub fn current_streak(totals: &BTreeMap<DayKey, u64>, goal_minutes: u32, today: NaiveDate) -> Streak {
    if goal_minutes == 0 {
        return Streak::default();
    }

    let met = |date: NaiveDate| {
        totals
            .get(&DayKey::from_date(date))
            .is_some_and(|minutes| *minutes >= u64::from(goal_minutes))
    };

    let includes_today = met(today);
    let mut cursor = if includes_today { Some(today) } else { today.pred_opt() };
    let mut days = 0u32;
    while let Some(date) = cursor {
        if !met(date) {
            break;
        }
        days += 1;
        cursor = date.pred_opt();
    }

    Streak { days, includes_today }
}
