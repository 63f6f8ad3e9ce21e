use super::schema;
use super::{
    AggregateStore, AggregateUpdate, Capacities, DailyStat, EventLogEntry, HistoryEntry,
    PlatformAggregate,
};
use crate::error::{Error, Result};
use crate::pending::Millis;
use crate::platform::PlatformId;
use rusqlite::{Connection, Transaction, TransactionBehavior, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite-backed aggregate store.
///
/// The connection lives behind a mutex and every access runs on the blocking
/// pool, so awaiting a store call never blocks the event loop.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    capacities: Capacities,
}

impl SqliteStore {
    pub fn open(path: &Path, capacities: Capacities) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL lets a viewer read while the tracker writes
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::from_connection(conn, capacities)
    }

    pub fn open_in_memory(capacities: Capacities) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, capacities)
    }

    fn from_connection(conn: Connection, capacities: Capacities) -> Result<Self> {
        schema::init(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
            capacities,
        })
    }

    pub fn capacities(&self) -> Capacities {
        self.capacities
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::Storage("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Storage(format!("storage task failed: {e}")))?
    }

    /// Synchronous snapshot of the raw connection for ad-hoc SQL.
    pub fn with_raw<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| Error::Storage("connection mutex poisoned".to_string()))?;
        f(&guard)
    }
}

fn insert_log(tx: &Transaction<'_>, entry: &EventLogEntry, capacity: usize) -> Result<()> {
    tx.execute(
        "INSERT INTO diagnostic_log (timestamp_ms, message) VALUES (?, ?)",
        params![entry.timestamp, entry.message],
    )?;
    tx.execute(
        "DELETE FROM diagnostic_log WHERE id NOT IN
            (SELECT id FROM diagnostic_log ORDER BY id DESC LIMIT ?)",
        [capacity as i64],
    )?;
    Ok(())
}

fn read_aggregate(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, PlatformAggregate)> {
    Ok((
        row.get(0)?,
        PlatformAggregate {
            display_name: row.get(1)?,
            query_count: row.get::<_, i64>(2)? as u64,
            cumulative_seconds: row.get(3)?,
            cumulative_energy_kwh: row.get(4)?,
            cumulative_co2_grams: row.get(5)?,
            cumulative_water_ml: row.get(6)?,
        },
    ))
}

const AGGREGATE_COLUMNS: &str =
    "platform, display_name, query_count, seconds, energy_kwh, co2_grams, water_ml";

/// Raise `last_update`, never lowering a value another writer stored.
fn bump_last_update(tx: &Transaction<'_>, ts: Millis) -> Result<()> {
    tx.execute(
        "INSERT INTO meta (key, value) VALUES ('last_update', ?1)
         ON CONFLICT(key) DO UPDATE SET
            value = MAX(CAST(value AS INTEGER), CAST(excluded.value AS INTEGER))",
        [ts],
    )?;
    Ok(())
}

impl AggregateStore for SqliteStore {
    async fn commit(&self, update: AggregateUpdate) -> Result<PlatformAggregate> {
        let caps = self.capacities;
        self.with_conn(move |conn| {
            let day = update.day();
            // Take the write lock up front so a second process waits on
            // busy_timeout instead of failing mid-transaction
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let m = &update.metrics;
            let (_, aggregate) = tx.query_row(
                &format!(
                    "INSERT INTO aggregates ({AGGREGATE_COLUMNS})
                     VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)
                     ON CONFLICT(platform) DO UPDATE SET
                        query_count = query_count + 1,
                        seconds = seconds + excluded.seconds,
                        energy_kwh = energy_kwh + excluded.energy_kwh,
                        co2_grams = co2_grams + excluded.co2_grams,
                        water_ml = water_ml + excluded.water_ml
                     RETURNING {AGGREGATE_COLUMNS}"
                ),
                params![
                    update.platform.as_str(),
                    update.display_name,
                    m.elapsed_seconds,
                    m.energy_kwh,
                    m.co2_grams,
                    m.water_ml
                ],
                read_aggregate,
            )?;

            let h = &update.history;
            tx.execute(
                "INSERT INTO request_history
                    (timestamp_ms, platform, url, duration_ms, energy_kwh, co2_grams, water_ml)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    h.timestamp,
                    h.platform.as_str(),
                    h.url,
                    h.duration_ms as i64,
                    h.energy_kwh,
                    h.co2_grams,
                    h.water_ml
                ],
            )?;
            tx.execute(
                "DELETE FROM request_history WHERE id NOT IN
                    (SELECT id FROM request_history ORDER BY id DESC LIMIT ?)",
                [caps.history as i64],
            )?;

            tx.execute(
                "INSERT INTO daily_stats (day, platform, query_count, energy_kwh, co2_grams, water_ml)
                 VALUES (?1, ?2, 1, ?3, ?4, ?5)
                 ON CONFLICT(day, platform) DO UPDATE SET
                    query_count = query_count + 1,
                    energy_kwh = energy_kwh + ?3,
                    co2_grams = co2_grams + ?4,
                    water_ml = water_ml + ?5",
                params![day, update.platform.as_str(), m.energy_kwh, m.co2_grams, m.water_ml],
            )?;

            insert_log(&tx, &update.log_entry(&aggregate), caps.log)?;
            bump_last_update(&tx, update.last_update)?;
            tx.commit()?;
            Ok(aggregate)
        })
        .await
    }

    async fn append_log(&self, entry: EventLogEntry) -> Result<()> {
        let capacity = self.capacities.log;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            insert_log(&tx, &entry, capacity)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn aggregates(&self) -> Result<BTreeMap<PlatformId, PlatformAggregate>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {AGGREGATE_COLUMNS} FROM aggregates"))?;
            let rows = stmt.query_map([], read_aggregate)?;
            let mut out = BTreeMap::new();
            for row in rows {
                let (platform, agg) = row?;
                out.insert(PlatformId::new(platform), agg);
            }
            Ok(out)
        })
        .await
    }

    async fn diagnostic_log(&self) -> Result<Vec<EventLogEntry>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT timestamp_ms, message FROM diagnostic_log ORDER BY id ASC")?;
            let rows = stmt.query_map([], |row| {
                Ok(EventLogEntry {
                    timestamp: row.get(0)?,
                    message: row.get(1)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp_ms, platform, url, duration_ms, energy_kwh, co2_grams, water_ml
                 FROM request_history ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(HistoryEntry {
                    timestamp: row.get(0)?,
                    platform: PlatformId::new(row.get::<_, String>(1)?),
                    url: row.get(2)?,
                    duration_ms: row.get::<_, i64>(3)? as u64,
                    energy_kwh: row.get(4)?,
                    co2_grams: row.get(5)?,
                    water_ml: row.get(6)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn daily_stats(&self, days: usize) -> Result<Vec<DailyStat>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT day, platform, query_count, energy_kwh, co2_grams, water_ml
                 FROM daily_stats
                 WHERE day IN (SELECT DISTINCT day FROM daily_stats ORDER BY day DESC LIMIT ?)
                 ORDER BY day DESC, query_count DESC, platform ASC",
            )?;
            let rows = stmt.query_map([days as i64], |row| {
                Ok(DailyStat {
                    day: row.get(0)?,
                    platform: PlatformId::new(row.get::<_, String>(1)?),
                    query_count: row.get::<_, i64>(2)? as u64,
                    energy_kwh: row.get(3)?,
                    co2_grams: row.get(4)?,
                    water_ml: row.get(5)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn last_update(&self) -> Result<Option<Millis>> {
        self.with_conn(|conn| {
            Ok(schema::get_meta(conn, "last_update")?.and_then(|v| v.parse().ok()))
        })
        .await
    }

    async fn reset(&self) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute_batch(
                "DELETE FROM aggregates;
                 DELETE FROM diagnostic_log;
                 DELETE FROM request_history;
                 DELETE FROM daily_stats;
                 DELETE FROM meta WHERE key = 'last_update';",
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::DerivedMetrics;

    fn update(platform: &str, ts: Millis) -> AggregateUpdate {
        let metrics = DerivedMetrics {
            elapsed_seconds: 1.0,
            energy_kwh: 0.5,
            co2_grams: 2.0,
            water_ml: 3.0,
        };
        AggregateUpdate {
            platform: PlatformId::new(platform),
            display_name: platform.to_uppercase(),
            metrics,
            history: HistoryEntry {
                timestamp: ts,
                platform: PlatformId::new(platform),
                url: format!("https://{platform}.test/api"),
                duration_ms: 1000,
                energy_kwh: 0.5,
                co2_grams: 2.0,
                water_ml: 3.0,
            },
            last_update: ts,
        }
    }

    #[tokio::test]
    async fn test_commit_increments_in_place() {
        let store = SqliteStore::open_in_memory(Capacities::default()).unwrap();
        let id = PlatformId::new("claude");
        assert!(store.aggregates().await.unwrap().is_empty());

        let first = store.commit(update("claude", 10)).await.unwrap();
        assert_eq!(first.query_count, 1);
        assert_eq!(first.display_name, "CLAUDE");
        let second = store.commit(update("claude", 20)).await.unwrap();
        assert_eq!(second.query_count, 2);
        assert_eq!(second.cumulative_energy_kwh, 1.0);
        assert_eq!(store.aggregates().await.unwrap()[&id], second);
        assert_eq!(store.last_update().await.unwrap(), Some(20));

        let log = store.diagnostic_log().await.unwrap();
        assert!(log[1].message.starts_with("CLAUDE: query #2"));

        let daily = store.daily_stats(7).await.unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].query_count, 2);
        assert_eq!(daily[0].energy_kwh, 1.0);
    }

    #[tokio::test]
    async fn test_last_update_never_moves_back() {
        let store = SqliteStore::open_in_memory(Capacities::default()).unwrap();
        store.commit(update("poe", 50)).await.unwrap();
        store.commit(update("poe", 30)).await.unwrap();
        assert_eq!(store.last_update().await.unwrap(), Some(50));
    }

    #[tokio::test]
    async fn test_log_and_history_are_bounded() {
        let caps = Capacities { log: 3, history: 2 };
        let store = SqliteStore::open_in_memory(caps).unwrap();
        for i in 1..=5 {
            store.commit(update("poe", i as Millis)).await.unwrap();
        }
        let log = store.diagnostic_log().await.unwrap();
        assert_eq!(
            log.iter().map(|e| e.timestamp).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
        let history = store.history().await.unwrap();
        assert_eq!(
            history.iter().map(|e| e.timestamp).collect::<Vec<_>>(),
            vec![4, 5]
        );
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let store = SqliteStore::open_in_memory(Capacities::default()).unwrap();
        store.commit(update("grok", 1)).await.unwrap();
        store.reset().await.unwrap();
        store.reset().await.unwrap();
        assert!(store.aggregates().await.unwrap().is_empty());
        assert!(store.diagnostic_log().await.unwrap().is_empty());
        assert!(store.history().await.unwrap().is_empty());
        assert!(store.daily_stats(7).await.unwrap().is_empty());
        assert_eq!(store.last_update().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envirotrack.db");
        {
            let store = SqliteStore::open(&path, Capacities::default()).unwrap();
            store.commit(update("gemini", 5)).await.unwrap();
        }
        let store = SqliteStore::open(&path, Capacities::default()).unwrap();
        let aggs = store.aggregates().await.unwrap();
        assert_eq!(aggs[&PlatformId::new("gemini")].query_count, 1);
    }
}
