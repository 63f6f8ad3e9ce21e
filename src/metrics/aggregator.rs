//! The only in-process writer of the aggregate store.
//!
//! The store applies each merge as one atomic increment, so writers in
//! other processes sharing the database never lose an update. Within this
//! process, merges for one platform still run under a per-platform lock so
//! `last_update` values are committed in the order they were issued, and a
//! reset takes an exclusive gate that excludes every in-flight merge.

use super::model::{CorrectionModel, DerivedMetrics};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::pending::{Millis, now_ms};
use crate::platform::{PlatformId, PlatformProfile, ProfileTable};
use crate::store::{AggregateStore, AggregateUpdate, EventLogEntry, HistoryEntry, PlatformAggregate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedMutexGuard, RwLock, broadcast};

/// Broadcast after every successful merge or reset. Delivery is best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatesChanged {
    pub last_update: Millis,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Merged and persisted; carries the new aggregate.
    Aggregated(PlatformAggregate),
    /// No profile for the platform; nothing was aggregated.
    Discarded,
    /// The store kept failing; the update was dropped.
    Dropped,
}

#[derive(Default)]
struct PlatformLocks {
    locks: Mutex<HashMap<PlatformId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PlatformLocks {
    async fn acquire(&self, platform: &PlatformId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(platform.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

pub struct MetricsAggregator<S> {
    store: Arc<S>,
    profiles: Arc<ProfileTable>,
    model: CorrectionModel,
    retries: u32,
    locks: PlatformLocks,
    reset_gate: RwLock<()>,
    last_update: AtomicI64,
    changes: broadcast::Sender<AggregatesChanged>,
}

impl<S: AggregateStore> MetricsAggregator<S> {
    pub fn new(store: Arc<S>, profiles: Arc<ProfileTable>, model: CorrectionModel) -> Self {
        let (changes, _) = broadcast::channel(16);
        MetricsAggregator {
            store,
            profiles,
            model,
            retries: 1,
            locks: PlatformLocks::default(),
            reset_gate: RwLock::new(()),
            last_update: AtomicI64::new(0),
            changes,
        }
    }

    /// Profiles, correction model and retry policy taken from `config`.
    pub fn from_config(store: Arc<S>, config: &EngineConfig) -> Self {
        Self::new(
            store,
            Arc::new(config.profile_table()),
            config.effective_correction(),
        )
        .with_retries(config.effective_storage_retries())
    }

    /// Number of times a failed merge is retried before the update is dropped.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Continue the `last_update` sequence of an existing store.
    pub fn resume_from(&self, last_update: Option<Millis>) {
        if let Some(ts) = last_update {
            self.last_update.fetch_max(ts, Ordering::SeqCst);
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn profiles(&self) -> &ProfileTable {
        &self.profiles
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AggregatesChanged> {
        self.changes.subscribe()
    }

    /// Record one query of `duration_ms` for `platform`, timestamped now.
    pub async fn record(&self, platform: &PlatformId, duration_ms: u64) -> RecordOutcome {
        self.record_at(platform, duration_ms, "", now_ms()).await
    }

    pub async fn record_at(
        &self,
        platform: &PlatformId,
        duration_ms: u64,
        url: &str,
        at: Millis,
    ) -> RecordOutcome {
        let Some(profile) = self.profiles.get(platform) else {
            tracing::debug!(%platform, "no profile, query not aggregated");
            self.log_best_effort(at, format!("No profile for platform '{platform}', query discarded"))
                .await;
            return RecordOutcome::Discarded;
        };
        let metrics = DerivedMetrics::derive(profile, duration_ms, self.model);

        let _gate = self.reset_gate.read().await;
        let _guard = self.locks.acquire(platform).await;

        let mut attempt = 0;
        loop {
            match self
                .merge(platform, profile, &metrics, duration_ms, url, at)
                .await
            {
                Ok(aggregate) => {
                    tracing::debug!(
                        %platform,
                        query_count = aggregate.query_count,
                        energy_kwh = aggregate.cumulative_energy_kwh,
                        "aggregate updated"
                    );
                    return RecordOutcome::Aggregated(aggregate);
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(%platform, error = %e, attempt, "aggregate merge failed, retrying");
                }
                Err(e) => {
                    tracing::warn!(%platform, error = %e, "aggregate merge failed, update dropped");
                    self.log_best_effort(
                        at,
                        format!("{}: storage failure, query not recorded ({e})", profile.display_name),
                    )
                    .await;
                    return RecordOutcome::Dropped;
                }
            }
        }
    }

    async fn merge(
        &self,
        platform: &PlatformId,
        profile: &PlatformProfile,
        metrics: &DerivedMetrics,
        duration_ms: u64,
        url: &str,
        at: Millis,
    ) -> Result<PlatformAggregate> {
        let last_update = self.next_last_update(at);
        let update = AggregateUpdate {
            platform: platform.clone(),
            display_name: profile.display_name.clone(),
            metrics: *metrics,
            history: HistoryEntry {
                timestamp: at,
                platform: platform.clone(),
                url: url.to_string(),
                duration_ms,
                energy_kwh: metrics.energy_kwh,
                co2_grams: metrics.co2_grams,
                water_ml: metrics.water_ml,
            },
            last_update,
        };
        let aggregate = self.store.commit(update).await?;
        let _ = self.changes.send(AggregatesChanged { last_update });
        Ok(aggregate)
    }

    /// Clear every aggregate and the diagnostic log.
    ///
    /// Waits for in-flight merges to finish; merges arriving meanwhile apply
    /// after the reset.
    pub async fn reset(&self) -> Result<()> {
        let _gate = self.reset_gate.write().await;
        self.store.reset().await?;
        let last_update = self.next_last_update(now_ms());
        let _ = self.changes.send(AggregatesChanged { last_update });
        tracing::info!("aggregates reset");
        Ok(())
    }

    /// Append a diagnostic entry, logging instead of failing if the store refuses.
    pub async fn log_best_effort(&self, at: Millis, message: String) {
        if let Err(e) = self
            .store
            .append_log(EventLogEntry::new(at, message))
            .await
        {
            tracing::warn!(error = %e, "could not append diagnostic log entry");
        }
    }

    /// Strictly increasing, and never behind the wall clock reading `now`.
    fn next_last_update(&self, now: Millis) -> Millis {
        let mut prev = self.last_update.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self.last_update.compare_exchange(
                prev,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Capacities, MemoryStore};

    fn aggregator() -> MetricsAggregator<MemoryStore> {
        MetricsAggregator::new(
            Arc::new(MemoryStore::yielding(Capacities::default())),
            Arc::new(ProfileTable::builtin()),
            CorrectionModel::Flat,
        )
    }

    #[tokio::test]
    async fn test_unknown_platform_is_discarded() {
        let agg = aggregator();
        let outcome = agg.record(&PlatformId::new("nope"), 100).await;
        assert_eq!(outcome, RecordOutcome::Discarded);
        assert!(agg.store().aggregates().await.unwrap().is_empty());
        assert_eq!(agg.store().diagnostic_log().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_creates_then_accumulates() {
        let agg = aggregator();
        let id = PlatformId::new("chatgpt");
        agg.record_at(&id, 300, "u", 1_000).await;
        let outcome = agg.record_at(&id, 700, "u", 2_000).await;
        let RecordOutcome::Aggregated(a) = outcome else {
            panic!("expected aggregate, got {outcome:?}");
        };
        assert_eq!(a.display_name, "ChatGPT");
        assert_eq!(a.query_count, 2);
        assert!((a.cumulative_seconds - 1.0).abs() < 1e-12);
        assert!((a.cumulative_energy_kwh - 0.000842).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_last_update_is_strictly_increasing() {
        let agg = aggregator();
        let mut rx = agg.subscribe();
        let id = PlatformId::new("claude");
        agg.record_at(&id, 1, "u", 5_000).await;
        agg.record_at(&id, 1, "u", 5_000).await;
        agg.record_at(&id, 1, "u", 4_000).await;
        let seen: Vec<Millis> = (0..3).map(|_| rx.try_recv().unwrap().last_update).collect();
        assert_eq!(seen, vec![5_000, 5_001, 5_002]);
    }

    #[tokio::test]
    async fn test_resume_from_store() {
        let agg = aggregator();
        agg.resume_from(Some(9_000));
        let mut rx = agg.subscribe();
        agg.record_at(&PlatformId::new("poe"), 1, "u", 10).await;
        assert_eq!(rx.try_recv().unwrap().last_update, 9_001);
    }

    #[tokio::test]
    async fn test_reset_notifies() {
        let agg = aggregator();
        let mut rx = agg.subscribe();
        agg.record(&PlatformId::new("grok"), 10).await;
        agg.reset().await.unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(agg.store().aggregates().await.unwrap().is_empty());
    }
}
