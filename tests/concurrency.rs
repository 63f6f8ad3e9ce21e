use envirotrack::Result;
use envirotrack::config::EngineConfig;
use envirotrack::metrics::{CorrectionModel, MetricsAggregator, RecordOutcome};
use envirotrack::pending::Millis;
use envirotrack::platform::{PlatformId, ProfileTable};
use envirotrack::store::{
    AggregateStore, AggregateUpdate, Capacities, DailyStat, EventLogEntry, HistoryEntry,
    MemoryStore, PlatformAggregate,
};
use envirotrack::tracker::{EndOutcome, Tracker};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

fn yielding_aggregator() -> Arc<MetricsAggregator<MemoryStore>> {
    Arc::new(MetricsAggregator::new(
        Arc::new(MemoryStore::yielding(Capacities::default())),
        Arc::new(ProfileTable::builtin()),
        CorrectionModel::Flat,
    ))
}

#[tokio::test]
async fn concurrent_records_for_one_platform_lose_nothing() {
    const N: u64 = 64;
    let agg = yielding_aggregator();
    let platform = PlatformId::new("chatgpt");

    let mut handles = Vec::new();
    for i in 0..N {
        let agg = Arc::clone(&agg);
        let platform = platform.clone();
        handles.push(tokio::spawn(async move {
            agg.record_at(&platform, 100 + i, "u", i as Millis).await
        }));
    }
    for h in handles {
        assert!(matches!(h.await.unwrap(), RecordOutcome::Aggregated(_)));
    }

    let aggs = agg.store().aggregates().await.unwrap();
    let a = &aggs[&platform];
    assert_eq!(a.query_count, N);

    let expected_secs: f64 = (0..N).map(|i| (100 + i) as f64 / 1000.0).sum();
    assert!((a.cumulative_seconds - expected_secs).abs() < 1e-9);
    assert!((a.cumulative_energy_kwh - 0.000421 * N as f64).abs() < 1e-12);
}

#[tokio::test]
async fn concurrent_records_across_platforms_are_independent() {
    let agg = yielding_aggregator();
    let platforms = ["chatgpt", "claude", "gemini", "perplexity"];

    let mut handles = Vec::new();
    for round in 0..10 {
        for p in platforms {
            let agg = Arc::clone(&agg);
            handles.push(tokio::spawn(async move {
                agg.record_at(&PlatformId::new(p), 10, "u", round).await
            }));
        }
    }
    for h in handles {
        h.await.unwrap();
    }

    let aggs = agg.store().aggregates().await.unwrap();
    for p in platforms {
        assert_eq!(aggs[&PlatformId::new(p)].query_count, 10);
    }
}

#[tokio::test]
async fn reset_during_merges_leaves_no_partial_state() {
    let agg = yielding_aggregator();
    let platform = PlatformId::new("claude");

    let mut handles = Vec::new();
    for i in 0..20 {
        let agg = Arc::clone(&agg);
        let platform = platform.clone();
        handles.push(tokio::spawn(async move {
            agg.record_at(&platform, 10, "u", i).await;
        }));
    }
    let resetter = {
        let agg = Arc::clone(&agg);
        tokio::spawn(async move { agg.reset().await })
    };
    for h in handles {
        h.await.unwrap();
    }
    resetter.await.unwrap().unwrap();

    // Each merge landed entirely before or entirely after the reset
    let aggs = agg.store().aggregates().await.unwrap();
    let history = agg.store().history().await.unwrap();
    let count = aggs.get(&platform).map_or(0, |a| a.query_count);
    assert_eq!(count as usize, history.len());
    if let Some(a) = aggs.get(&platform) {
        assert!((a.cumulative_seconds - count as f64 * 0.01).abs() < 1e-9);
    }
}

#[tokio::test]
async fn concurrent_ends_through_tracker() {
    let tracker = Arc::new(Tracker::new(
        Arc::new(MemoryStore::yielding(Capacities::default())),
        &EngineConfig::default(),
    ));
    for i in 0..30 {
        tracker.on_request_begin(
            &i.to_string(),
            "https://www.perplexity.ai/rest/sse/perplexity_ask/stream",
            "POST",
            0,
        );
    }

    let mut handles = Vec::new();
    for i in 0..30 {
        let tracker = Arc::clone(&tracker);
        handles.push(tokio::spawn(async move {
            tracker.on_request_completed(&i.to_string(), 1000).await
        }));
    }
    for h in handles {
        assert!(matches!(h.await.unwrap(), EndOutcome::Aggregated(_)));
    }
    let aggs = tracker.aggregates().await.unwrap();
    assert_eq!(aggs[&PlatformId::new("perplexity")].query_count, 30);
    assert_eq!(tracker.pending_counts(), (0, 0));
}

/// Fails the first `failures` commits, then delegates.
struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        FlakyStore {
            inner: MemoryStore::default(),
            failures: AtomicU32::new(failures),
        }
    }
}

impl AggregateStore for FlakyStore {
    async fn commit(&self, update: AggregateUpdate) -> Result<PlatformAggregate> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(envirotrack::Error::Storage("disk full".to_string()));
        }
        self.inner.commit(update).await
    }

    async fn append_log(&self, entry: EventLogEntry) -> Result<()> {
        self.inner.append_log(entry).await
    }

    async fn aggregates(&self) -> Result<BTreeMap<PlatformId, PlatformAggregate>> {
        self.inner.aggregates().await
    }

    async fn diagnostic_log(&self) -> Result<Vec<EventLogEntry>> {
        self.inner.diagnostic_log().await
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>> {
        self.inner.history().await
    }

    async fn daily_stats(&self, days: usize) -> Result<Vec<DailyStat>> {
        self.inner.daily_stats(days).await
    }

    async fn last_update(&self) -> Result<Option<Millis>> {
        self.inner.last_update().await
    }

    async fn reset(&self) -> Result<()> {
        self.inner.reset().await
    }
}

fn flaky_aggregator(failures: u32) -> MetricsAggregator<FlakyStore> {
    MetricsAggregator::new(
        Arc::new(FlakyStore::new(failures)),
        Arc::new(ProfileTable::builtin()),
        CorrectionModel::Flat,
    )
}

#[tokio::test]
async fn single_storage_failure_is_retried() {
    let agg = flaky_aggregator(1);
    let mut rx = agg.subscribe();
    let outcome = agg.record_at(&PlatformId::new("deepseek"), 500, "u", 0).await;
    assert!(matches!(outcome, RecordOutcome::Aggregated(ref a) if a.query_count == 1));
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn persistent_storage_failure_drops_update_and_logs() {
    let agg = flaky_aggregator(2);
    let mut rx = agg.subscribe();
    let outcome = agg.record_at(&PlatformId::new("deepseek"), 500, "u", 0).await;
    assert_eq!(outcome, RecordOutcome::Dropped);
    assert!(rx.try_recv().is_err());
    assert!(agg.store().aggregates().await.unwrap().is_empty());

    let log = agg.store().diagnostic_log().await.unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].message.contains("storage failure"));

    // The store recovered; the next query counts from zero
    let outcome = agg.record_at(&PlatformId::new("deepseek"), 500, "u", 1).await;
    assert!(matches!(outcome, RecordOutcome::Aggregated(ref a) if a.query_count == 1));
}

#[tokio::test]
async fn zero_retries_drops_on_first_failure() {
    let agg = flaky_aggregator(1).with_retries(0);
    let outcome = agg.record_at(&PlatformId::new("copilot"), 1, "u", 0).await;
    assert_eq!(outcome, RecordOutcome::Dropped);
}
