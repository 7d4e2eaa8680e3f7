use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::{debug, error, info};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::DurationRecordStore;
use crate::day_key::{get_day_key, DayWindow};

use super::daily::{daily_goal_progress, DailyGoalProgress};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What readers of the fetcher see. `progress` keeps the last successful
/// result while a newer request is loading or after a request failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchState {
    pub loading: bool,
    pub goal_minutes: Option<u32>,
    pub progress: Option<DailyGoalProgress>,
    /// Token of the request that produced `progress`.
    pub request: u64,
}

struct InFlight {
    token: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Loads today's persisted totals for one user and keeps the result in a
/// `watch` channel.
///
/// Every fetch gets a fresh request token. Starting a new fetch cancels the
/// one in flight, and a response is only applied if its token is still the
/// latest, so an older query can never overwrite a newer one.
pub struct DailyProgressFetcher {
    store: Arc<dyn DurationRecordStore>,
    user_id: String,
    timezone: Tz,
    state_tx: watch::Sender<FetchState>,
    latest_request: Arc<AtomicU64>,
    in_flight: Mutex<Option<InFlight>>,
    now_provider: NowProvider,
}

impl DailyProgressFetcher {
    pub fn new(store: Arc<dyn DurationRecordStore>, user_id: impl Into<String>, timezone: Tz) -> Self {
        let (state_tx, _) = watch::channel(FetchState::default());
        Self {
            store,
            user_id: user_id.into(),
            timezone,
            state_tx,
            latest_request: Arc::new(AtomicU64::new(0)),
            in_flight: Mutex::new(None),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> FetchState {
        self.state_tx.borrow().clone()
    }

    /// Fetches only when the goal actually changed. Returns the new request
    /// token, or `None` when nothing was started.
    pub fn set_goal_minutes(&self, goal_minutes: u32) -> Option<u64> {
        let changed = self.state_tx.send_if_modified(|state| {
            if state.goal_minutes == Some(goal_minutes) {
                return false;
            }
            state.goal_minutes = Some(goal_minutes);
            true
        });

        if changed {
            Some(self.refresh())
        } else {
            None
        }
    }

    /// Starts a fetch for the current goal and returns its request token.
    /// Must be called from within a Tokio runtime.
    pub fn refresh(&self) -> u64 {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let token = self.latest_request.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = in_flight.take() {
            debug!("Cancelling superseded progress request {}", previous.token);
            previous.cancel.cancel();
        }

        let goal_minutes = {
            let mut goal = 0;
            self.state_tx.send_modify(|state| {
                state.loading = true;
                goal = state.goal_minutes.unwrap_or(0);
            });
            goal
        };

        let now = (self.now_provider)();
        let window = DayWindow::containing(now, self.timezone);
        let day_key = get_day_key(now, self.timezone);
        let cancel = CancellationToken::new();

        let task = FetchTask {
            store: Arc::clone(&self.store),
            user_id: self.user_id.clone(),
            window,
            goal_minutes,
            token,
            latest_request: Arc::clone(&self.latest_request),
            state_tx: self.state_tx.clone(),
        };
        let cancel_for_task = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel_for_task.cancelled() => {
                    debug!("Progress request {} cancelled", task.token);
                }
                _ = task.run() => {}
            }
        });

        info!(
            "Fetching daily progress for {} (request {token}, goal {goal_minutes} min)",
            day_key
        );

        *in_flight = Some(InFlight {
            token,
            cancel,
            handle,
        });
        token
    }

    /// Waits for the request currently in flight, if any.
    pub async fn settled(&self) {
        let handle = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|in_flight| in_flight.handle);

        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!("Progress request task failed to join: {err}");
            }
        }
    }
}

impl Drop for DailyProgressFetcher {
    fn drop(&mut self) {
        let in_flight = self
            .in_flight
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(in_flight) = in_flight {
            in_flight.cancel.cancel();
        }
    }
}

struct FetchTask {
    store: Arc<dyn DurationRecordStore>,
    user_id: String,
    window: DayWindow,
    goal_minutes: u32,
    token: u64,
    latest_request: Arc<AtomicU64>,
    state_tx: watch::Sender<FetchState>,
}

impl FetchTask {
    async fn run(&self) {
        let result = self
            .store
            .list_duration_records(&self.user_id, self.window)
            .await;

        let token = self.token;
        let latest_request = &self.latest_request;
        let applied = self.state_tx.send_if_modified(|state| {
            // Checked under the channel lock so a newer refresh cannot slip
            // in between the check and the write.
            if latest_request.load(Ordering::SeqCst) != token {
                return false;
            }
            state.loading = false;
            match &result {
                Ok(records) => {
                    state.progress = Some(daily_goal_progress(records, self.goal_minutes));
                    state.request = token;
                }
                Err(err) => {
                    error!("Failed to fetch daily progress (request {token}): {err:#}");
                }
            }
            true
        });

        if !applied {
            debug!("Discarded stale progress response for request {token}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{FakeDurationRecordStore, FakeListResponse};
    use crate::db::DurationRecord;
    use std::time::Duration;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn record_at(seconds: Option<u64>, created_at: &str) -> DurationRecord {
        let mut record = DurationRecord::new("user-1", None, None, 0, fixed_time(created_at));
        record.duration_seconds = seconds;
        record
    }

    fn fetcher_for(store: Arc<FakeDurationRecordStore>, tz: Tz) -> DailyProgressFetcher {
        DailyProgressFetcher::new(store, "user-1", tz)
            .with_now_provider(Arc::new(|| fixed_time("2024-03-10T12:00:00Z")))
    }

    #[tokio::test]
    async fn sums_todays_records_in_the_configured_zone() {
        let tz: Tz = "America/Sao_Paulo".parse().expect("known zone");
        let store = Arc::new(FakeDurationRecordStore::with_records(vec![
            record_at(None, "2024-03-10T04:00:00Z"),
            record_at(Some(300), "2024-03-10T10:00:00Z"),
            record_at(None, "2024-03-10T11:00:00Z"),
            record_at(Some(120), "2024-03-10T11:30:00Z"),
            // 23:30 local on the previous day.
            record_at(Some(3600), "2024-03-10T02:30:00Z"),
        ]));
        let fetcher = fetcher_for(Arc::clone(&store), tz);

        let token = fetcher.set_goal_minutes(30).expect("goal change starts a fetch");
        fetcher.settled().await;

        let state = fetcher.state();
        assert!(!state.loading);
        assert_eq!(state.request, token);
        let progress = state.progress.expect("progress loaded");
        assert_eq!(progress.actual_minutes, 7);
        assert_eq!(progress.goal_minutes, 30);
        assert_eq!(progress.percentage_progress, -77);
        assert!(!progress.is_above);
    }

    #[tokio::test]
    async fn unchanged_goal_does_not_refetch() {
        let store = Arc::new(FakeDurationRecordStore::default());
        let fetcher = fetcher_for(Arc::clone(&store), Tz::UTC);

        assert!(fetcher.set_goal_minutes(30).is_some());
        fetcher.settled().await;
        assert!(fetcher.set_goal_minutes(30).is_none());
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);

        fetcher.refresh();
        fetcher.settled().await;
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn superseded_request_never_overwrites_newer_one() {
        let slow = vec![record_at(Some(6000), "2024-03-10T10:00:00Z")];
        let fast = vec![record_at(Some(600), "2024-03-10T10:00:00Z")];
        let store = Arc::new(FakeDurationRecordStore::with_list_responses(vec![
            FakeListResponse::Delayed(Duration::from_millis(200), slow),
            FakeListResponse::Records(fast),
        ]));
        let fetcher = fetcher_for(Arc::clone(&store), Tz::UTC);
        let mut state_rx = fetcher.subscribe();

        let first = fetcher.set_goal_minutes(20).expect("first fetch");
        while store.list_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let second = fetcher.set_goal_minutes(40).expect("second fetch");
        assert!(second > first);

        fetcher.settled().await;
        tokio::time::sleep(Duration::from_millis(250)).await;

        let state = state_rx.borrow_and_update().clone();
        assert_eq!(state.request, second);
        let progress = state.progress.expect("progress loaded");
        assert_eq!(progress.actual_minutes, 10);
        assert_eq!(progress.goal_minutes, 40);
    }

    #[tokio::test]
    async fn failure_keeps_last_known_progress() {
        let store = Arc::new(FakeDurationRecordStore::with_list_responses(vec![
            FakeListResponse::Records(vec![record_at(Some(1200), "2024-03-10T10:00:00Z")]),
            FakeListResponse::Failure,
        ]));
        let fetcher = fetcher_for(Arc::clone(&store), Tz::UTC);

        let first = fetcher.set_goal_minutes(20).expect("fetch");
        fetcher.settled().await;
        let before = fetcher.state().progress.expect("loaded");

        fetcher.refresh();
        fetcher.settled().await;

        let state = fetcher.state();
        assert!(!state.loading);
        assert_eq!(state.request, first);
        assert_eq!(state.progress, Some(before));
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn late_response_from_outdated_request_is_discarded() {
        let store = Arc::new(FakeDurationRecordStore::with_list_responses(vec![
            FakeListResponse::Records(vec![record_at(Some(600), "2024-03-10T10:00:00Z")]),
            FakeListResponse::Records(vec![record_at(Some(6000), "2024-03-10T09:00:00Z")]),
        ]));
        let fetcher = fetcher_for(Arc::clone(&store), Tz::UTC);

        let newer = fetcher.set_goal_minutes(40).expect("fetch");
        fetcher.settled().await;
        let applied = fetcher.state();
        assert_eq!(applied.request, newer);

        // A response for an older token that ran to completion without
        // being cancelled.
        let outdated = FetchTask {
            store: store.clone(),
            user_id: "user-1".into(),
            window: DayWindow::containing(fixed_time("2024-03-10T12:00:00Z"), Tz::UTC),
            goal_minutes: 20,
            token: newer - 1,
            latest_request: Arc::clone(&fetcher.latest_request),
            state_tx: fetcher.state_tx.clone(),
        };
        outdated.run().await;

        assert_eq!(store.list_calls.load(Ordering::SeqCst), 2);
        let state = fetcher.state();
        assert_eq!(state, applied);
        assert_eq!(state.progress.map(|progress| progress.actual_minutes), Some(10));
    }
}
