pub mod backend;
pub mod day_key;
pub mod db;
pub mod progress;
pub mod settings;
pub mod streak;
pub mod timer;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use chrono_tz::Tz;
use log::info;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use backend::{DurationRecordStore, RestConfig, RestDurationRecordStore};
use day_key::{parse_timezone, DayWindow};
use db::{Database, DurationRecord};
use progress::{reconcile, spawn_live_progress, DailyProgress, DailyProgressFetcher};
use settings::SettingsStore;
use streak::{current_streak, minutes_by_day, Streak};
use timer::{SessionController, TimerSnapshot};

pub const SETTINGS_FILE: &str = "settings.json";
pub const DATABASE_FILE: &str = "muzze.sqlite3";

/// Everything a front end needs, wired from one data directory.
///
/// Session operations that persist time go through the app so the fetcher
/// re-reads today's totals right after the write.
pub struct ProgressApp {
    settings: SettingsStore,
    store: Arc<dyn DurationRecordStore>,
    timezone: Tz,
    user_id: String,
    pub timer: SessionController,
    pub fetcher: DailyProgressFetcher,
}

impl ProgressApp {
    /// `timezone_override` wins over the configured zone; both go through
    /// the same validation.
    pub fn open(data_dir: &Path, timezone_override: Option<&str>) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE));
        let progress = settings.progress();
        let timezone = match timezone_override {
            Some(name) => parse_timezone(name)?,
            None => progress.tz()?,
        };

        let store = open_store(&settings, data_dir)?;
        let timer = SessionController::new(Arc::clone(&store), progress.user_id.clone(), timezone);
        let fetcher = DailyProgressFetcher::new(Arc::clone(&store), progress.user_id.clone(), timezone);

        info!(
            "Progress engine ready for user {} in {}",
            progress.user_id,
            timezone.name()
        );

        Ok(Self {
            settings,
            store,
            timezone,
            user_id: progress.user_id,
            timer,
            fetcher,
        })
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Fetches today's totals (once per goal change) and reconciles them
    /// with the current timer.
    pub async fn current_progress(&self, goal_minutes: Option<u32>) -> Result<DailyProgress> {
        let goal = goal_minutes.unwrap_or(self.settings.progress().daily_goal_minutes);
        if self.fetcher.set_goal_minutes(goal).is_none() {
            self.fetcher.refresh();
        }
        self.fetcher.settled().await;

        let fetched = self.fetcher.state();
        let (db_actual, db_goal) = fetched
            .progress
            .map(|progress| (progress.actual_minutes, progress.goal_minutes))
            .unwrap_or((0, goal));
        Ok(reconcile(&self.timer.snapshot().await, db_actual, db_goal))
    }

    /// Progress that follows the timer tick by tick and the fetcher's
    /// results, published on its own channel.
    pub fn live_progress(&self) -> (watch::Receiver<DailyProgress>, JoinHandle<()>) {
        spawn_live_progress(self.timer.subscribe(), self.fetcher.subscribe())
    }

    pub async fn start_session(&self, goal_minutes: Option<u32>) -> Result<TimerSnapshot> {
        self.timer.start_session(goal_minutes).await
    }

    pub async fn complete_stage(&self) -> Result<Option<DurationRecord>> {
        let record = self.timer.complete_stage().await?;
        if record.is_some() {
            self.fetcher.refresh();
        }
        Ok(record)
    }

    pub async fn stop_session(&self) -> Result<Option<DurationRecord>> {
        let record = self.timer.stop_session().await?;
        self.fetcher.refresh();
        Ok(record)
    }

    pub async fn streak(&self, lookback_days: u32) -> Result<Streak> {
        let now = Utc::now();
        let today = now.with_timezone(&self.timezone).date_naive();
        let first = today - Duration::days(i64::from(lookback_days.max(1)) - 1);
        let window = DayWindow::spanning(first, today, self.timezone);

        let records = self
            .store
            .list_duration_records(&self.user_id, window)
            .await
            .context("failed to load duration history")?;
        let totals = minutes_by_day(&records, self.timezone);
        Ok(current_streak(
            &totals,
            self.settings.progress().daily_goal_minutes,
            today,
        ))
    }
}

fn open_store(settings: &SettingsStore, data_dir: &Path) -> Result<Arc<dyn DurationRecordStore>> {
    let backend = settings.backend();
    match (backend.rest_url, backend.api_key) {
        (Some(url), Some(api_key)) if !url.trim().is_empty() => {
            info!("Using hosted duration records at {url}");
            let config = RestConfig::new(url, api_key).with_access_token(backend.access_token);
            Ok(Arc::new(RestDurationRecordStore::new(config)?))
        }
        _ => Ok(Arc::new(Database::new(data_dir.join(DATABASE_FILE))?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ProgressSettings;

    #[test]
    fn invalid_timezone_override_fails_to_open() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(ProgressApp::open(dir.path(), Some("Atlantis/Capital")).is_err());
    }

    #[tokio::test]
    async fn progress_and_streak_read_the_local_store() {
        let dir = tempfile::tempdir().expect("temp dir");
        {
            let settings = SettingsStore::new(dir.path().join(SETTINGS_FILE));
            settings
                .update_progress(ProgressSettings {
                    daily_goal_minutes: 20,
                    timezone: "UTC".into(),
                    user_id: "user-1".into(),
                })
                .expect("save settings");
        }

        let app = ProgressApp::open(dir.path(), None).expect("open app");
        let db = Database::new(dir.path().join(DATABASE_FILE)).expect("second handle");
        let now = Utc::now();
        db.insert_duration_record(&DurationRecord::new("user-1", None, None, 1500, now))
            .await
            .expect("today");
        db.insert_duration_record(&DurationRecord::new("user-1", None, None, 1500, now - Duration::days(1)))
            .await
            .expect("yesterday");

        let progress = app.current_progress(None).await.expect("progress");
        assert_eq!(progress.actual_minutes, 25);
        assert_eq!(progress.goal_minutes, 20);
        assert_eq!(progress.percentage_progress, 125);
        assert!(progress.is_above);
        assert!(!progress.is_live);

        let streak = app.streak(7).await.expect("streak");
        assert_eq!(streak.days, 2);
        assert!(streak.includes_today);
    }

    #[tokio::test]
    async fn stopping_a_session_keeps_the_live_total_on_display() {
        let dir = tempfile::tempdir().expect("temp dir");
        SettingsStore::new(dir.path().join(SETTINGS_FILE))
            .update_progress(ProgressSettings {
                daily_goal_minutes: 40,
                timezone: "UTC".into(),
                user_id: "user-1".into(),
            })
            .expect("save settings");

        let app = ProgressApp::open(dir.path(), None).expect("open app");
        let db = Database::new(dir.path().join(DATABASE_FILE)).expect("second handle");
        db.insert_duration_record(&DurationRecord::new("user-1", None, None, 1800, Utc::now()))
            .await
            .expect("seed");

        let before = app.current_progress(None).await.expect("progress");
        assert_eq!(before.percentage_progress, 75);

        let (mut progress_rx, live_task) = app.live_progress();
        app.start_session(Some(40)).await.expect("start");
        app.timer.backdate_running_anchor(std::time::Duration::from_secs(900)).await;
        app.timer.pause_session().await.expect("pause");

        let live = *progress_rx
            .wait_for(|progress| progress.is_live && progress.actual_minutes == 45)
            .await
            .expect("live update");
        assert_eq!(live.percentage_progress, 113);

        let record = app.stop_session().await.expect("stop").expect("persisted");
        assert!(record.seconds() >= 900);

        let stopped = *progress_rx
            .wait_for(|progress| !progress.is_live)
            .await
            .expect("stopped update");
        assert_eq!(stopped.actual_minutes, live.actual_minutes);
        assert_eq!(stopped.percentage_progress, live.percentage_progress);
        assert!(stopped.is_above);

        app.fetcher.settled().await;
        let persisted = app.fetcher.state().progress.expect("refetched");
        assert_eq!(persisted.actual_minutes, 45);
        assert_eq!(*progress_rx.borrow(), stopped);

        live_task.abort();
    }

    #[tokio::test]
    async fn completed_stage_refreshes_persisted_totals() {
        let dir = tempfile::tempdir().expect("temp dir");
        let app = ProgressApp::open(dir.path(), None).expect("open app");
        app.current_progress(Some(30)).await.expect("progress");

        app.start_session(None).await.expect("start");
        app.timer.backdate_running_anchor(std::time::Duration::from_secs(600)).await;
        app.complete_stage().await.expect("complete").expect("persisted");
        app.fetcher.settled().await;

        let persisted = app.fetcher.state().progress.expect("refetched");
        assert_eq!(persisted.actual_minutes, 10);
        app.timer.cancel_session().await.expect("cancel");
    }
}
