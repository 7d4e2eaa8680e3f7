use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::day_key::DayWindow;
use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime, stored_seconds, to_i64},
    models::DurationRecord,
};

fn row_to_record(row: &Row) -> Result<DurationRecord> {
    let id: String = row.get("id")?;
    let created_at: String = row.get("created_at")?;
    let stage: Option<i64> = row.get("stage")?;
    let duration_seconds: Option<i64> = row.get("duration_seconds")?;

    Ok(DurationRecord {
        duration_seconds: stored_seconds(duration_seconds, &id),
        id,
        user_id: row.get("user_id")?,
        session_id: row.get("session_id")?,
        stage: stage
            .map(|value| u32::try_from(value).context("stage out of range"))
            .transpose()?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

impl Database {
    pub async fn insert_duration_record(&self, record: &DurationRecord) -> Result<()> {
        let record = record.clone();
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO duration_records (id, user_id, session_id, stage, duration_seconds, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.user_id,
                    record.session_id,
                    record.stage,
                    record.duration_seconds.map(to_i64).transpose()?,
                    format_timestamp(record.created_at),
                ],
            )
            .with_context(|| "failed to insert duration record")?;
            Ok(())
        })
        .await
    }

    /// Records for `user_id` created inside `window`, oldest first.
    pub async fn list_duration_records(
        &self,
        user_id: &str,
        window: DayWindow,
    ) -> Result<Vec<DurationRecord>> {
        let user_id = user_id.to_string();
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, session_id, stage, duration_seconds, created_at
                 FROM duration_records
                 WHERE user_id = ?1 AND created_at >= ?2 AND created_at < ?3
                 ORDER BY created_at ASC",
            )?;

            let mut rows = stmt.query(params![
                user_id,
                format_timestamp(window.start),
                format_timestamp(window.end),
            ])?;

            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use chrono_tz::Tz;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn open_temp_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db = Database::new(dir.path().join("muzze.sqlite3")).expect("open db");
        (dir, db)
    }

    #[tokio::test]
    async fn lists_only_records_inside_window_for_user() {
        let (_dir, db) = open_temp_db();
        let window = DayWindow::containing(fixed_time("2024-03-10T12:00:00Z"), Tz::UTC);

        let inside = DurationRecord::new("user-1", None, Some(1), 300, fixed_time("2024-03-10T00:00:00Z"));
        let late = DurationRecord::new("user-1", None, Some(2), 120, fixed_time("2024-03-10T23:59:59.999Z"));
        let next_day = DurationRecord::new("user-1", None, None, 600, fixed_time("2024-03-11T00:00:00Z"));
        let other_user = DurationRecord::new("user-2", None, None, 900, fixed_time("2024-03-10T10:00:00Z"));

        for record in [&inside, &late, &next_day, &other_user] {
            db.insert_duration_record(record).await.expect("insert");
        }

        let records = db
            .list_duration_records("user-1", window)
            .await
            .expect("list");

        assert_eq!(records, vec![inside, late]);
    }

    #[tokio::test]
    async fn null_durations_roundtrip_as_none() {
        let (_dir, db) = open_temp_db();
        let mut record = DurationRecord::new("user-1", Some("sess-1".into()), None, 0, fixed_time("2024-03-10T08:00:00Z"));
        record.duration_seconds = None;
        db.insert_duration_record(&record).await.expect("insert");

        let window = DayWindow::containing(record.created_at, Tz::UTC);
        let records = db.list_duration_records("user-1", window).await.expect("list");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].duration_seconds, None);
        assert_eq!(records[0].session_id.as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn negative_duration_lists_as_missing() {
        let (_dir, db) = open_temp_db();
        db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO duration_records (id, user_id, duration_seconds, created_at)
                 VALUES ('bad', 'user-1', -30, '2024-03-10T08:00:00.000Z')",
                [],
            )?;
            Ok(())
        })
        .await
        .expect("seed row");
        let good = DurationRecord::new("user-1", None, None, 240, fixed_time("2024-03-10T09:00:00Z"));
        db.insert_duration_record(&good).await.expect("insert");

        let window = DayWindow::containing(good.created_at, Tz::UTC);
        let records = db.list_duration_records("user-1", window).await.expect("list");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].duration_seconds, None);
        assert_eq!(records[1].seconds(), 240);
    }
}
