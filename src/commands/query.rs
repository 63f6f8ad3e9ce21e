use crate::error::Result;
use crate::store::SqliteStore;
use rusqlite::Connection;
use rusqlite::types::Value;
use std::io::Write;

/// Column names plus every row, already rendered as text.
#[derive(Debug, PartialEq)]
struct QueryOutput {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

pub fn run(store: &SqliteStore, sql: &str) -> Result<()> {
    let output = store.with_raw(|conn| fetch(conn, sql))?;
    write_tsv(&mut std::io::stdout().lock(), &output)
}

fn fetch(conn: &Connection, sql: &str) -> Result<QueryOutput> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut rendered = Vec::with_capacity(width);
        for i in 0..width {
            rendered.push(render(&row.get::<_, Value>(i)?));
        }
        rows.push(rendered);
    }
    Ok(QueryOutput { columns, rows })
}

fn write_tsv(out: &mut impl Write, output: &QueryOutput) -> Result<()> {
    writeln!(out, "{}", output.columns.join("\t"))?;
    for row in &output.rows {
        writeln!(out, "{}", row.join("\t"))?;
    }
    Ok(())
}

/// Per-query energy values are around 1e-4 kWh, so reals keep nine decimals.
fn render(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => format!("{f:.9}"),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::store::{AggregateStore, Capacities};
    use crate::tracker::Tracker;
    use std::sync::Arc;

    #[test]
    fn test_render() {
        assert_eq!(render(&Value::Null), "NULL");
        assert_eq!(render(&Value::Real(0.000421)), "0.000421000");
        assert_eq!(render(&Value::Blob(vec![1, 2])), "<blob 2 bytes>");
    }

    #[tokio::test]
    async fn test_query_against_live_store() {
        let store = Arc::new(SqliteStore::open_in_memory(Capacities::default()).unwrap());
        let tracker = Tracker::new(Arc::clone(&store), &EngineConfig::default());
        tracker.on_request_begin("1", "https://chatgpt.com/backend-api/x", "POST", 0);
        tracker.on_request_completed("1", 300).await;
        assert_eq!(store.aggregates().await.unwrap().len(), 1);

        let output = store
            .with_raw(|conn| fetch(conn, "SELECT platform, query_count, energy_kwh FROM aggregates"))
            .unwrap();
        assert_eq!(output.columns, vec!["platform", "query_count", "energy_kwh"]);
        assert_eq!(output.rows, vec![vec!["chatgpt", "1", "0.000421000"]]);

        let mut out = Vec::new();
        write_tsv(&mut out, &output).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "platform\tquery_count\tenergy_kwh\nchatgpt\t1\t0.000421000\n"
        );
    }

    #[test]
    fn test_bad_sql_is_an_error() {
        let store = SqliteStore::open_in_memory(Capacities::default()).unwrap();
        assert!(store.with_raw(|conn| fetch(conn, "SELECT nope FROM nowhere")).is_err());
    }
}
