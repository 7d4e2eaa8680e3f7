use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use log::{error, info};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use uuid::Uuid;

use crate::{
    backend::DurationRecordStore,
    day_key::{get_day_key, DayWindow},
    db::DurationRecord,
    progress::total_duration_seconds,
};

use super::{TimerSnapshot, TimerState, TimerStatus};

/// Owns the session timer. Readers never touch [`TimerState`]; they get
/// [`TimerSnapshot`]s through [`SessionController::subscribe`], refreshed on
/// every lifecycle change and on every tick while running.
#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<TimerState>>,
    store: Arc<dyn DurationRecordStore>,
    user_id: String,
    timezone: Tz,
    snapshot_tx: Arc<watch::Sender<TimerSnapshot>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_interval: Duration,
}

impl SessionController {
    pub fn new(store: Arc<dyn DurationRecordStore>, user_id: impl Into<String>, timezone: Tz) -> Self {
        let (snapshot_tx, _) = watch::channel(TimerSnapshot::default());
        Self {
            state: Arc::new(Mutex::new(TimerState::new())),
            store,
            user_id: user_id.into(),
            timezone,
            snapshot_tx: Arc::new(snapshot_tx),
            ticker: Arc::new(Mutex::new(None)),
            tick_interval: Duration::from_secs(1),
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        let mut guard = self.state.lock().await;
        guard.sync_elapsed_from_anchor();
        guard.snapshot()
    }

    /// Starts a session. The daily baseline is today's persisted total at
    /// this moment; `daily_goal_minutes` overrides the persisted goal while
    /// the session runs.
    pub async fn start_session(&self, daily_goal_minutes: Option<u32>) -> Result<TimerSnapshot> {
        {
            let state = self.state.lock().await;
            if state.is_active() {
                bail!("session already active");
            }
        }

        let started_at = Utc::now();
        let window = DayWindow::containing(started_at, self.timezone);
        let records = self
            .store
            .list_duration_records(&self.user_id, window)
            .await
            .context("failed to load today's persisted duration")?;
        let baseline_seconds = total_duration_seconds(&records);

        let session_id = Uuid::new_v4().to_string();
        {
            let mut state = self.state.lock().await;
            if state.is_active() {
                bail!("session already active");
            }
            state.begin_session(
                session_id.clone(),
                baseline_seconds,
                daily_goal_minutes,
                started_at,
                Instant::now(),
            );
        }

        self.spawn_ticker().await;
        info!(
            "Started session {session_id} on {} with {baseline_seconds}s already logged",
            get_day_key(started_at, self.timezone)
        );

        Ok(self.publish().await)
    }

    pub async fn pause_session(&self) -> Result<TimerSnapshot> {
        {
            let mut state = self.state.lock().await;
            if state.status != TimerStatus::Running {
                bail!("no running session to pause");
            }
            state.pause();
        }
        self.cancel_ticker().await;
        Ok(self.publish().await)
    }

    pub async fn resume_session(&self) -> Result<TimerSnapshot> {
        {
            let mut state = self.state.lock().await;
            if state.status != TimerStatus::Paused {
                bail!("no paused session to resume");
            }
            state.resume(Instant::now());
        }
        self.spawn_ticker().await;
        Ok(self.publish().await)
    }

    /// Closes the current stage and starts the next one with elapsed time
    /// back at zero. The stage is persisted when it has whole seconds.
    pub async fn complete_stage(&self) -> Result<Option<DurationRecord>> {
        let record = {
            let mut state = self.state.lock().await;
            if !state.is_active() {
                bail!("no active session");
            }
            let stage = state.stage;
            let seconds = state.finish_stage(Instant::now());
            self.stage_record(&state, stage, seconds)
        };

        self.publish().await;
        if let Some(record) = &record {
            self.persist(record).await?;
        }
        Ok(record)
    }

    /// Ends the session, persisting the unfinished stage when it has any
    /// whole seconds. The timer stays `Stopped` with its final elapsed time
    /// until the next start or a cancel.
    pub async fn stop_session(&self) -> Result<Option<DurationRecord>> {
        let record = {
            let mut state = self.state.lock().await;
            if !state.is_active() {
                bail!("no active session to stop");
            }
            state.stop();
            self.stage_record(&state, state.stage, state.elapsed_ms / 1000)
        };

        self.cancel_ticker().await;
        self.publish().await;

        if let Some(record) = &record {
            self.persist(record).await?;
        }
        info!(
            "Stopped session; persisted {}s",
            record.as_ref().map(DurationRecord::seconds).unwrap_or(0)
        );
        Ok(record)
    }

    /// Drops the session without persisting anything.
    pub async fn cancel_session(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.status == TimerStatus::Idle {
                return Ok(());
            }
            state.cancel();
        }
        self.cancel_ticker().await;
        self.publish().await;
        Ok(())
    }

    fn stage_record(&self, state: &TimerState, stage: u32, seconds: u64) -> Option<DurationRecord> {
        (seconds > 0).then(|| {
            DurationRecord::new(
                self.user_id.clone(),
                state.session_id.clone(),
                Some(stage),
                seconds,
                Utc::now(),
            )
        })
    }

    #[cfg(test)]
    pub(crate) async fn backdate_running_anchor(&self, by: Duration) {
        let mut state = self.state.lock().await;
        if let Some(anchor) = state.running_anchor {
            state.running_anchor = Some(anchor - by);
        }
    }

    async fn persist(&self, record: &DurationRecord) -> Result<()> {
        self.store
            .insert_duration_record(record)
            .await
            .with_context(|| format!("failed to persist duration record {}", record.id))
            .inspect_err(|err| error!("{err:#}"))
    }

    async fn publish(&self) -> TimerSnapshot {
        let snapshot = self.snapshot().await;
        self.snapshot_tx.send_replace(snapshot.clone());
        snapshot
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let state = self.state.clone();
        let snapshot_tx = self.snapshot_tx.clone();
        let tick_interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;

                let snapshot = {
                    let mut guard = state.lock().await;
                    if guard.status != TimerStatus::Running {
                        break;
                    }
                    guard.sync_elapsed_from_anchor();
                    guard.snapshot()
                };

                snapshot_tx.send_if_modified(|current| {
                    if *current == snapshot {
                        return false;
                    }
                    *current = snapshot;
                    true
                });
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }
}
