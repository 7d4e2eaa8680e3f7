//! Live progress: the running timer merged with the persisted baseline.
//!
//! While a session is active the displayed total is
//! `baseline + elapsed`, computed locally on every tick. Once the session
//! is stopped that same total is what the store holds, so the last live
//! value stays on display until a fetch issued after the stop lands.

use log::debug;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::timer::{TimerSnapshot, TimerStatus};

use super::{rounded_percent, FetchState};

pub const MAX_PERCENTAGE: u32 = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyProgress {
    pub actual_minutes: u64,
    pub goal_minutes: u32,
    /// Share of the goal reached, clamped to `0..=200`.
    pub percentage_progress: u32,
    pub is_above: bool,
    pub is_live: bool,
}

pub fn reconcile(timer: &TimerSnapshot, db_actual_minutes: u64, db_goal_minutes: u32) -> DailyProgress {
    if timer.is_active {
        let live_seconds = timer
            .daily_baseline_seconds
            .saturating_add(timer.elapsed_seconds);
        let goal_minutes = timer
            .daily_goal_minutes
            .filter(|goal| *goal > 0)
            .unwrap_or(db_goal_minutes);
        progress_for(live_seconds / 60, goal_minutes, true)
    } else {
        progress_for(db_actual_minutes, db_goal_minutes, false)
    }
}

fn progress_for(actual_minutes: u64, goal_minutes: u32, is_live: bool) -> DailyProgress {
    if goal_minutes == 0 {
        return DailyProgress {
            actual_minutes,
            goal_minutes,
            percentage_progress: 0,
            is_above: false,
            is_live,
        };
    }

    let actual = i64::try_from(actual_minutes).unwrap_or(i64::MAX);
    let percentage = rounded_percent(actual, i64::from(goal_minutes)).clamp(0, i64::from(MAX_PERCENTAGE));

    DailyProgress {
        actual_minutes,
        goal_minutes,
        percentage_progress: percentage as u32,
        is_above: actual_minutes >= u64::from(goal_minutes),
        is_live,
    }
}

fn reconcile_from(timer: &TimerSnapshot, fetched: &FetchState) -> DailyProgress {
    let (db_actual, db_goal) = fetched
        .progress
        .map(|progress| (progress.actual_minutes, progress.goal_minutes))
        .unwrap_or((0, fetched.goal_minutes.unwrap_or(0)));
    reconcile(timer, db_actual, db_goal)
}

/// Tracks the hand-over from live to persisted numbers.
#[derive(Debug, Default)]
struct LiveTracker {
    last_live: Option<DailyProgress>,
    /// Fetch request visible the last time the timer was active.
    request_while_live: u64,
}

impl LiveTracker {
    fn next(&mut self, timer: &TimerSnapshot, fetched: &FetchState) -> DailyProgress {
        if timer.is_active {
            let progress = reconcile_from(timer, fetched);
            self.last_live = Some(progress);
            self.request_while_live = fetched.request;
            return progress;
        }

        // A cancelled session persisted nothing, so the fetched totals are
        // already right. A stopped one is only reflected by a later fetch.
        let awaiting_fetch =
            timer.status == TimerStatus::Stopped && fetched.request <= self.request_while_live;
        match self.last_live {
            Some(held) if awaiting_fetch => DailyProgress {
                is_live: false,
                ..held
            },
            _ => {
                self.last_live = None;
                reconcile_from(timer, fetched)
            }
        }
    }
}

/// Recomputes [`DailyProgress`] whenever the timer or the fetched totals
/// change. The task ends once both upstream senders are gone.
pub fn spawn_live_progress(
    mut timer_rx: watch::Receiver<TimerSnapshot>,
    mut fetch_rx: watch::Receiver<FetchState>,
) -> (watch::Receiver<DailyProgress>, JoinHandle<()>) {
    let mut tracker = LiveTracker::default();
    let initial = tracker.next(&timer_rx.borrow_and_update(), &fetch_rx.borrow_and_update());
    let (progress_tx, progress_rx) = watch::channel(initial);

    let handle = tokio::spawn(async move {
        let mut timer_open = true;
        let mut fetch_open = true;

        while timer_open || fetch_open {
            tokio::select! {
                changed = timer_rx.changed(), if timer_open => {
                    if changed.is_err() {
                        timer_open = false;
                        continue;
                    }
                }
                changed = fetch_rx.changed(), if fetch_open => {
                    if changed.is_err() {
                        fetch_open = false;
                        continue;
                    }
                }
            }

            let next = tracker.next(&timer_rx.borrow_and_update(), &fetch_rx.borrow_and_update());
            progress_tx.send_if_modified(|current| {
                if *current == next {
                    return false;
                }
                *current = next;
                true
            });

            if progress_tx.is_closed() {
                break;
            }
        }

        debug!("Live progress task finished");
    });

    (progress_rx, handle)
}
