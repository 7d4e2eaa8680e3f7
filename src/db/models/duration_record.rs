use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One persisted stretch of focused time. `duration_seconds` is nullable in
/// the hosted schema; readers treat a missing value as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRecord {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub stage: Option<u32>,
    pub duration_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl DurationRecord {
    pub fn new(
        user_id: impl Into<String>,
        session_id: Option<String>,
        stage: Option<u32>,
        duration_seconds: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            session_id,
            stage,
            duration_seconds: Some(duration_seconds),
            created_at,
        }
    }

    pub fn seconds(&self) -> u64 {
        self.duration_seconds.unwrap_or(0)
    }
}
