use anyhow::{bail, Context, Result};
use rusqlite::Connection;

const SCHEMA_VERSION: i32 = 1;

const DURATION_RECORDS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS duration_records (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    session_id TEXT,
    stage INTEGER,
    duration_seconds INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_duration_records_user_created
    ON duration_records (user_id, created_at);
";

/// Creates the duration table on a fresh file. A file written by a newer
/// build is refused rather than read with the wrong columns.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read schema version")?;

    match version {
        SCHEMA_VERSION => Ok(()),
        0 => {
            let tx = conn.transaction().context("failed to open schema transaction")?;
            tx.execute_batch(DURATION_RECORDS_SCHEMA)
                .context("failed to create duration_records")?;
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)
                .context("failed to record schema version")?;
            tx.commit().context("failed to commit schema")
        }
        newer => bail!("database schema version {newer} is newer than supported {SCHEMA_VERSION}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_version(conn: &Connection) -> i32 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("user_version")
    }

    #[test]
    fn fresh_database_gets_current_schema() {
        let mut conn = Connection::open_in_memory().expect("in-memory db");
        migrate(&mut conn).expect("migrate");
        migrate(&mut conn).expect("second run is a no-op");

        assert_eq!(schema_version(&conn), SCHEMA_VERSION);
        let columns: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('duration_records')",
                [],
                |row| row.get(0),
            )
            .expect("table info");
        assert_eq!(columns, 6);
    }

    #[test]
    fn newer_database_is_rejected() {
        let mut conn = Connection::open_in_memory().expect("in-memory db");
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .expect("bump version");
        assert!(migrate(&mut conn).is_err());
    }
}
