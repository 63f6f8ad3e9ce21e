use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension};

pub const SCHEMA_VERSION: i32 = 1;

/// Create missing tables and stamp the schema version.
///
/// Existing data is kept. A database stamped by a newer version is refused.
pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Metadata: schema_version, last_update
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- One row per platform, lazily created on first aggregated query
        CREATE TABLE IF NOT EXISTS aggregates (
            platform TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            query_count INTEGER NOT NULL DEFAULT 0,
            seconds REAL NOT NULL DEFAULT 0,
            energy_kwh REAL NOT NULL DEFAULT 0,
            co2_grams REAL NOT NULL DEFAULT 0,
            water_ml REAL NOT NULL DEFAULT 0
        );

        -- Bounded diagnostic ring (trimmed on append)
        CREATE TABLE IF NOT EXISTS diagnostic_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp_ms INTEGER NOT NULL,
            message TEXT NOT NULL
        );

        -- Bounded recent-request history (trimmed on append)
        CREATE TABLE IF NOT EXISTS request_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp_ms INTEGER NOT NULL,
            platform TEXT NOT NULL,
            url TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            energy_kwh REAL NOT NULL,
            co2_grams REAL NOT NULL,
            water_ml REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS daily_stats (
            day TEXT NOT NULL,
            platform TEXT NOT NULL,
            query_count INTEGER NOT NULL DEFAULT 0,
            energy_kwh REAL NOT NULL DEFAULT 0,
            co2_grams REAL NOT NULL DEFAULT 0,
            water_ml REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (day, platform)
        );
        "#,
    )?;

    match get_meta(conn, "schema_version")? {
        Some(v) => {
            let found: i32 = v
                .parse()
                .map_err(|_| Error::Storage(format!("unreadable schema_version '{v}'")))?;
            if found > SCHEMA_VERSION {
                return Err(Error::SchemaVersion {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
            if found < SCHEMA_VERSION {
                set_meta(conn, "schema_version", &SCHEMA_VERSION.to_string())?;
            }
        }
        None => {
            set_meta(conn, "schema_version", &SCHEMA_VERSION.to_string())?;
            set_meta(conn, "created_at", &chrono::Utc::now().to_rfc3339())?;
        }
    }
    Ok(())
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        [key, value],
    )?;
    Ok(())
}

pub fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?", [key], |row| {
        row.get(0)
    })
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();
        assert_eq!(
            get_meta(&conn, "schema_version").unwrap().as_deref(),
            Some("1")
        );
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        set_meta(&conn, "schema_version", "99").unwrap();
        match init(&conn) {
            Err(Error::SchemaVersion { found, supported }) => {
                assert_eq!(found, 99);
                assert_eq!(supported, SCHEMA_VERSION);
            }
            other => panic!("expected SchemaVersion error, got {other:?}"),
        }
    }
}
