use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub status: TimerStatus,
    pub session_id: Option<String>,
    /// 1-based; bumped by every completed stage of the running session.
    pub stage: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    pub daily_baseline_seconds: u64,
    pub daily_goal_minutes: Option<u32>,
    /// Time accumulated from earlier running windows of the current stage;
    /// combines with `running_anchor` to compute the true elapsed time.
    #[serde(skip)]
    pub elapsed_ms_baseline: u64,
    #[serde(skip)]
    pub running_anchor: Option<Instant>,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            status: TimerStatus::Idle,
            session_id: None,
            stage: 0,
            started_at: None,
            elapsed_ms: 0,
            daily_baseline_seconds: 0,
            daily_goal_minutes: None,
            elapsed_ms_baseline: 0,
            running_anchor: None,
        }
    }
}

/// Read-only view of the timer handed to progress readers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub status: TimerStatus,
    pub session_id: Option<String>,
    pub stage: u32,
    pub is_active: bool,
    pub elapsed_seconds: u64,
    pub daily_baseline_seconds: u64,
    pub daily_goal_minutes: Option<u32>,
}

impl TimerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A paused session still counts: its elapsed time is not persisted yet.
    pub fn is_active(&self) -> bool {
        matches!(self.status, TimerStatus::Running | TimerStatus::Paused)
    }

    pub fn current_elapsed_ms(&self) -> u64 {
        if let (TimerStatus::Running, Some(anchor)) = (self.status, self.running_anchor) {
            self.elapsed_ms_baseline
                .saturating_add(anchor.elapsed().as_millis() as u64)
        } else {
            self.elapsed_ms
        }
    }

    pub fn sync_elapsed_from_anchor(&mut self) {
        if let (TimerStatus::Running, Some(anchor)) = (self.status, self.running_anchor) {
            self.elapsed_ms = self
                .elapsed_ms_baseline
                .saturating_add(anchor.elapsed().as_millis() as u64);
        }
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            status: self.status,
            session_id: self.session_id.clone(),
            stage: self.stage,
            is_active: self.is_active(),
            elapsed_seconds: self.current_elapsed_ms() / 1000,
            daily_baseline_seconds: self.daily_baseline_seconds,
            daily_goal_minutes: self.daily_goal_minutes,
        }
    }

    pub fn begin_session(
        &mut self,
        session_id: String,
        daily_baseline_seconds: u64,
        daily_goal_minutes: Option<u32>,
        start_at: DateTime<Utc>,
        now: Instant,
    ) {
        *self = Self {
            status: TimerStatus::Running,
            session_id: Some(session_id),
            stage: 1,
            started_at: Some(start_at),
            elapsed_ms: 0,
            daily_baseline_seconds,
            daily_goal_minutes,
            elapsed_ms_baseline: 0,
            running_anchor: Some(now),
        };
    }

    pub fn pause(&mut self) {
        if self.status != TimerStatus::Running {
            return;
        }
        self.sync_elapsed_from_anchor();
        self.status = TimerStatus::Paused;
        self.running_anchor = None;
        self.elapsed_ms_baseline = self.elapsed_ms;
    }

    pub fn resume(&mut self, now: Instant) {
        if self.status != TimerStatus::Paused {
            return;
        }
        self.status = TimerStatus::Running;
        self.elapsed_ms_baseline = self.elapsed_ms;
        self.running_anchor = Some(now);
    }

    /// Closes the current stage and opens the next one. The finished stage's
    /// whole seconds move into the daily baseline so `baseline + elapsed`
    /// stays continuous across the boundary. Returns the finished seconds.
    pub fn finish_stage(&mut self, now: Instant) -> u64 {
        self.sync_elapsed_from_anchor();
        let finished_seconds = self.elapsed_ms / 1000;
        self.daily_baseline_seconds = self.daily_baseline_seconds.saturating_add(finished_seconds);
        self.stage = self.stage.saturating_add(1);
        self.elapsed_ms = 0;
        self.elapsed_ms_baseline = 0;
        if self.status == TimerStatus::Running {
            self.running_anchor = Some(now);
        }
        finished_seconds
    }

    pub fn stop(&mut self) {
        self.sync_elapsed_from_anchor();
        self.status = TimerStatus::Stopped;
        self.running_anchor = None;
        self.elapsed_ms_baseline = self.elapsed_ms;
    }

    pub fn cancel(&mut self) {
        *self = Self::default();
    }
}
