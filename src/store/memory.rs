use super::{
    AggregateStore, AggregateUpdate, Capacities, DailyStat, EventLogEntry, HistoryEntry,
    PlatformAggregate,
};
use crate::error::Result;
use crate::pending::Millis;
use crate::platform::PlatformId;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    aggregates: BTreeMap<PlatformId, PlatformAggregate>,
    log: VecDeque<EventLogEntry>,
    history: VecDeque<HistoryEntry>,
    daily: BTreeMap<(String, PlatformId), DailyStat>,
    last_update: Option<Millis>,
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, capacity: usize) {
    ring.push_back(item);
    while ring.len() > capacity {
        ring.pop_front();
    }
}

/// In-process store with no durability.
///
/// With [`MemoryStore::yielding`], every access first yields to the
/// scheduler, so concurrent callers interleave the way they would against a
/// real asynchronous backend.
pub struct MemoryStore {
    state: Mutex<State>,
    capacities: Capacities,
    yield_on_access: bool,
}

impl MemoryStore {
    pub fn new(capacities: Capacities) -> Self {
        MemoryStore {
            state: Mutex::new(State::default()),
            capacities,
            yield_on_access: false,
        }
    }

    pub fn yielding(capacities: Capacities) -> Self {
        MemoryStore {
            yield_on_access: true,
            ..Self::new(capacities)
        }
    }

    async fn access(&self) -> MutexGuard<'_, State> {
        if self.yield_on_access {
            tokio::task::yield_now().await;
        }
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Capacities::default())
    }
}

impl AggregateStore for MemoryStore {
    async fn commit(&self, update: AggregateUpdate) -> Result<PlatformAggregate> {
        let caps = self.capacities;
        let day = update.day();
        let mut guard = self.access().await;
        let state = &mut *guard;

        let daily = state
            .daily
            .entry((day.clone(), update.platform.clone()))
            .or_insert_with(|| DailyStat::empty(day, update.platform.clone()));
        daily.query_count += 1;
        daily.energy_kwh += update.metrics.energy_kwh;
        daily.co2_grams += update.metrics.co2_grams;
        daily.water_ml += update.metrics.water_ml;

        let current = state
            .aggregates
            .entry(update.platform.clone())
            .or_insert_with(|| PlatformAggregate::zeroed(&update.display_name));
        *current = current.merged(&update.metrics);
        let aggregate = current.clone();

        push_bounded(&mut state.log, update.log_entry(&aggregate), caps.log);
        push_bounded(&mut state.history, update.history, caps.history);
        state.last_update = Some(
            state
                .last_update
                .map_or(update.last_update, |prev| prev.max(update.last_update)),
        );
        Ok(aggregate)
    }

    async fn append_log(&self, entry: EventLogEntry) -> Result<()> {
        let capacity = self.capacities.log;
        push_bounded(&mut self.access().await.log, entry, capacity);
        Ok(())
    }

    async fn aggregates(&self) -> Result<BTreeMap<PlatformId, PlatformAggregate>> {
        Ok(self.access().await.aggregates.clone())
    }

    async fn diagnostic_log(&self) -> Result<Vec<EventLogEntry>> {
        Ok(self.access().await.log.iter().cloned().collect())
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.access().await.history.iter().cloned().collect())
    }

    async fn daily_stats(&self, days: usize) -> Result<Vec<DailyStat>> {
        let state = self.access().await;
        let mut recent: Vec<&String> = state.daily.keys().map(|(day, _)| day).collect();
        recent.dedup();
        recent.reverse();
        recent.truncate(days);

        let mut out: Vec<DailyStat> = state
            .daily
            .values()
            .filter(|s| recent.contains(&&s.day))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.day
                .cmp(&a.day)
                .then(b.query_count.cmp(&a.query_count))
                .then(a.platform.cmp(&b.platform))
        });
        Ok(out)
    }

    async fn last_update(&self) -> Result<Option<Millis>> {
        Ok(self.access().await.last_update)
    }

    async fn reset(&self) -> Result<()> {
        *self.access().await = State::default();
        Ok(())
    }
}
