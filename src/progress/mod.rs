pub mod daily;
pub mod fetcher;
pub mod live;

pub use daily::{daily_goal_progress, total_duration_seconds, DailyGoalProgress};
pub use fetcher::{DailyProgressFetcher, FetchState};
pub use live::{reconcile, spawn_live_progress, DailyProgress};

/// `round(numerator * 100 / denominator)` with halves rounded towards
/// positive infinity. `denominator` must be positive.
pub(crate) fn rounded_percent(numerator: i64, denominator: i64) -> i64 {
    debug_assert!(denominator > 0);
    (numerator.saturating_mul(200).saturating_add(denominator)).div_euclid(denominator * 2)
}
