pub mod daily;
pub mod history;
pub mod ingest;
pub mod log;
pub mod query;
pub mod reset;
pub mod stats;
pub mod view;

use crate::pending::Millis;

/// Local wall-clock rendering of an epoch-millisecond timestamp.
pub(crate) fn format_timestamp(ms: Millis) -> String {
    use chrono::TimeZone;
    match chrono::Local.timestamp_millis_opt(ms).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ms.to_string(),
    }
}

/// Seconds as `1h02m`, `3m05s` or `4.2s`.
pub(crate) fn format_seconds(secs: f64) -> String {
    if secs >= 3600.0 {
        let whole = secs as u64;
        format!("{}h{:02}m", whole / 3600, (whole % 3600) / 60)
    } else if secs >= 60.0 {
        let whole = secs as u64;
        format!("{}m{:02}s", whole / 60, whole % 60)
    } else {
        format!("{:.1}s", secs)
    }
}
