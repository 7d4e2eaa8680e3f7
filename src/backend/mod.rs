//! Where duration records live. The session controller, the progress
//! fetcher and the streak query all talk to a [`DurationRecordStore`]; the
//! app picks the hosted REST store when one is configured and falls back to
//! the local SQLite database otherwise.

mod rest;

pub use rest::{RestConfig, RestDurationRecordStore};

use anyhow::Result;
use async_trait::async_trait;

use crate::day_key::DayWindow;
use crate::db::{Database, DurationRecord};

#[async_trait]
pub trait DurationRecordStore: Send + Sync {
    async fn list_duration_records(
        &self,
        user_id: &str,
        window: DayWindow,
    ) -> Result<Vec<DurationRecord>>;

    async fn insert_duration_record(&self, record: &DurationRecord) -> Result<()>;
}

#[async_trait]
impl DurationRecordStore for Database {
    async fn list_duration_records(
        &self,
        user_id: &str,
        window: DayWindow,
    ) -> Result<Vec<DurationRecord>> {
        Database::list_duration_records(self, user_id, window).await
    }

    async fn insert_duration_record(&self, record: &DurationRecord) -> Result<()> {
        Database::insert_duration_record(self, record).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use super::DurationRecordStore;
    use crate::day_key::DayWindow;
    use crate::db::DurationRecord;

    /// Scripted reply for one `list_duration_records` call.
    #[derive(Debug, Clone)]
    pub enum FakeListResponse {
        Records(Vec<DurationRecord>),
        Delayed(Duration, Vec<DurationRecord>),
        Failure,
    }

    /// Keeps inserted records in memory. Scripted list replies, when present,
    /// are served first; after that listing filters the inserted records.
    #[derive(Debug, Default)]
    pub struct FakeDurationRecordStore {
        pub records: Mutex<Vec<DurationRecord>>,
        list_responses: Mutex<VecDeque<FakeListResponse>>,
        pub list_calls: AtomicUsize,
    }

    impl FakeDurationRecordStore {
        pub fn with_records(records: Vec<DurationRecord>) -> Self {
            Self {
                records: Mutex::new(records),
                ..Self::default()
            }
        }

        pub fn with_list_responses(responses: Vec<FakeListResponse>) -> Self {
            Self {
                list_responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        pub fn inserted(&self) -> Vec<DurationRecord> {
            self.records.lock().expect("records lock poisoned").clone()
        }
    }

    #[async_trait]
    impl DurationRecordStore for FakeDurationRecordStore {
        async fn list_duration_records(
            &self,
            user_id: &str,
            window: DayWindow,
        ) -> Result<Vec<DurationRecord>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self
                .list_responses
                .lock()
                .expect("list response lock poisoned")
                .pop_front();

            match scripted {
                Some(FakeListResponse::Records(records)) => Ok(records),
                Some(FakeListResponse::Delayed(delay, records)) => {
                    tokio::time::sleep(delay).await;
                    Ok(records)
                }
                Some(FakeListResponse::Failure) => Err(anyhow!("network error while listing records")),
                None => Ok(self
                    .records
                    .lock()
                    .expect("records lock poisoned")
                    .iter()
                    .filter(|record| record.user_id == user_id && window.contains(record.created_at))
                    .cloned()
                    .collect()),
            }
        }

        async fn insert_duration_record(&self, record: &DurationRecord) -> Result<()> {
            self.records
                .lock()
                .expect("records lock poisoned")
                .push(record.clone());
            Ok(())
        }
    }
}
