//! Durable aggregate storage.
//!
//! [`AggregateStore`] is the seam between the aggregation engine and its
//! persistence. Every method may suspend; implementations must make
//! [`AggregateStore::commit`] and [`AggregateStore::reset`] all-or-nothing
//! from a reader's point of view. A commit is an increment applied by the
//! store itself, never an absolute value computed by the caller, so writers
//! sharing one database cannot overwrite each other.

mod memory;
mod schema;
mod sqlite;

pub use memory::MemoryStore;
pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::metrics::DerivedMetrics;
use crate::pending::Millis;
use crate::platform::PlatformId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;

pub const DEFAULT_LOG_CAPACITY: usize = 50;
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Running totals for one platform.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlatformAggregate {
    pub display_name: String,
    pub query_count: u64,
    pub cumulative_seconds: f64,
    pub cumulative_energy_kwh: f64,
    pub cumulative_co2_grams: f64,
    pub cumulative_water_ml: f64,
}

impl PlatformAggregate {
    pub fn zeroed(display_name: &str) -> Self {
        PlatformAggregate {
            display_name: display_name.to_string(),
            ..Default::default()
        }
    }

    /// A copy with one more query and its metrics added.
    pub fn merged(&self, m: &DerivedMetrics) -> Self {
        PlatformAggregate {
            display_name: self.display_name.clone(),
            query_count: self.query_count + 1,
            cumulative_seconds: self.cumulative_seconds + m.elapsed_seconds,
            cumulative_energy_kwh: self.cumulative_energy_kwh + m.energy_kwh,
            cumulative_co2_grams: self.cumulative_co2_grams + m.co2_grams,
            cumulative_water_ml: self.cumulative_water_ml + m.water_ml,
        }
    }
}

/// Sum over every platform.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Totals {
    pub query_count: u64,
    pub seconds: f64,
    pub energy_kwh: f64,
    pub co2_grams: f64,
    pub water_ml: f64,
}

impl Totals {
    pub fn from_aggregates<'a>(aggs: impl IntoIterator<Item = &'a PlatformAggregate>) -> Self {
        aggs.into_iter().fold(Totals::default(), |t, a| Totals {
            query_count: t.query_count + a.query_count,
            seconds: t.seconds + a.cumulative_seconds,
            energy_kwh: t.energy_kwh + a.cumulative_energy_kwh,
            co2_grams: t.co2_grams + a.cumulative_co2_grams,
            water_ml: t.water_ml + a.cumulative_water_ml,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: Millis,
    pub message: String,
}

impl EventLogEntry {
    pub fn new(timestamp: Millis, message: impl Into<String>) -> Self {
        EventLogEntry {
            timestamp,
            message: message.into(),
        }
    }
}

/// One aggregated request, kept in a bounded recent-history list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: Millis,
    pub platform: PlatformId,
    pub url: String,
    pub duration_ms: u64,
    pub energy_kwh: f64,
    pub co2_grams: f64,
    pub water_ml: f64,
}

/// Per-day, per-platform totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStat {
    /// UTC calendar day, `YYYY-MM-DD`.
    pub day: String,
    pub platform: PlatformId,
    pub query_count: u64,
    pub energy_kwh: f64,
    pub co2_grams: f64,
    pub water_ml: f64,
}

impl DailyStat {
    pub fn empty(day: impl Into<String>, platform: PlatformId) -> Self {
        DailyStat {
            day: day.into(),
            platform,
            query_count: 0,
            energy_kwh: 0.0,
            co2_grams: 0.0,
            water_ml: 0.0,
        }
    }
}

/// One query's worth of increments, committed atomically.
#[derive(Debug, Clone)]
pub struct AggregateUpdate {
    pub platform: PlatformId,
    /// Display name used if this is the platform's first query.
    pub display_name: String,
    pub metrics: DerivedMetrics,
    pub history: HistoryEntry,
    pub last_update: Millis,
}

impl AggregateUpdate {
    pub fn day(&self) -> String {
        day_of(self.history.timestamp)
    }

    /// Diagnostic entry describing this query once merged into `aggregate`.
    pub fn log_entry(&self, aggregate: &PlatformAggregate) -> EventLogEntry {
        let m = &self.metrics;
        EventLogEntry::new(
            self.history.timestamp,
            format!(
                "{}: query #{} ({:.1}s, {:.6} kWh, {:.3} g CO2, {:.3} ml water)",
                aggregate.display_name,
                aggregate.query_count,
                m.elapsed_seconds,
                m.energy_kwh,
                m.co2_grams,
                m.water_ml
            ),
        )
    }
}

pub(crate) fn day_of(ms: Millis) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

/// Ring sizes for the bounded lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacities {
    pub log: usize,
    pub history: usize,
}

impl Default for Capacities {
    fn default() -> Self {
        Capacities {
            log: DEFAULT_LOG_CAPACITY,
            history: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// A read-only copy of everything the presentation layer shows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub aggregates: BTreeMap<PlatformId, PlatformAggregate>,
    pub totals: Totals,
    pub last_update: Option<Millis>,
}

pub trait AggregateStore: Send + Sync + 'static {
    /// Add one query to the platform's aggregate, creating it if needed, and
    /// write the matching log, history and daily entries. Returns the
    /// aggregate as it stands after this commit.
    fn commit(
        &self,
        update: AggregateUpdate,
    ) -> impl Future<Output = Result<PlatformAggregate>> + Send;

    /// Append to the diagnostic log, dropping the oldest entries beyond capacity.
    fn append_log(&self, entry: EventLogEntry) -> impl Future<Output = Result<()>> + Send;

    fn aggregates(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<PlatformId, PlatformAggregate>>> + Send;

    /// Oldest first.
    fn diagnostic_log(&self) -> impl Future<Output = Result<Vec<EventLogEntry>>> + Send;

    /// Oldest first.
    fn history(&self) -> impl Future<Output = Result<Vec<HistoryEntry>>> + Send;

    /// Stats for the most recent `days` distinct days, newest day first.
    fn daily_stats(&self, days: usize) -> impl Future<Output = Result<Vec<DailyStat>>> + Send;

    fn last_update(&self) -> impl Future<Output = Result<Option<Millis>>> + Send;

    /// Clear aggregates, log, history and daily stats in one step.
    fn reset(&self) -> impl Future<Output = Result<()>> + Send;

    fn snapshot(&self) -> impl Future<Output = Result<Snapshot>> + Send {
        async {
            let aggregates = self.aggregates().await?;
            let last_update = self.last_update().await?;
            Ok(Snapshot {
                totals: Totals::from_aggregates(aggregates.values()),
                aggregates,
                last_update,
            })
        }
    }
}
