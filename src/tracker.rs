//! Request lifecycle pipeline.
//!
//! ```text
//! begin ──prefilter──► PendingTable ──end/fail──► Classifier ──► MetricsAggregator ──► store
//! ```
//!
//! Network observation and in-page interception each own a [`PendingTable`];
//! both feed the same aggregator. The same logical request seen by both
//! sources is counted twice.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{InboundEvent, NetworkEvent, PageMessage};
use crate::metrics::{AggregatesChanged, MetricsAggregator, RecordOutcome};
use crate::pending::{CompletedRequest, Millis, PendingTable, now_ms};
use crate::platform::{Classifier, PlatformId, Prefilter};
use crate::store::{
    AggregateStore, DailyStat, EventLogEntry, HistoryEntry, PlatformAggregate, Snapshot,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// What became of an end (or failure) signal.
#[derive(Debug, Clone, PartialEq)]
pub enum EndOutcome {
    /// No pending request with that id: never tracked, already ended, or evicted.
    NotFound,
    /// Platform recognized and aggregated.
    Aggregated(PlatformAggregate),
    /// Platform unrecognized; nothing aggregated.
    Discarded,
    /// Platform recognized but the store failed; nothing aggregated.
    Dropped,
}

/// Result of [`Tracker::handle`].
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    /// A begin signal; `tracked` is false when the prefilter rejected it.
    Begin { tracked: bool },
    End(EndOutcome),
}

pub struct Tracker<S> {
    network: PendingTable,
    page: PendingTable,
    classifier: Classifier,
    network_filter: Prefilter,
    page_filter: Prefilter,
    aggregator: MetricsAggregator<S>,
}

impl<S: AggregateStore> Tracker<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        let max_age_ms = config.effective_max_pending_age().as_millis() as u64;
        let aggregator = MetricsAggregator::from_config(store, config);

        Tracker {
            network: PendingTable::new("network", max_age_ms),
            page: PendingTable::new("page", max_age_ms),
            classifier: config.classifier(),
            network_filter: config.network_prefilter(),
            page_filter: config.page_prefilter(),
            aggregator,
        }
    }

    /// Build a tracker that continues the `last_update` sequence of `store`.
    pub async fn open(store: Arc<S>, config: &EngineConfig) -> Result<Self> {
        let last_update = store.last_update().await?;
        let tracker = Self::new(store, config);
        tracker.aggregator.resume_from(last_update);
        Ok(tracker)
    }

    pub fn aggregator(&self) -> &MetricsAggregator<S> {
        &self.aggregator
    }

    /// Network begin. Returns whether the request is now tracked.
    pub fn on_request_begin(&self, request_id: &str, url: &str, method: &str, at: Millis) -> bool {
        if !self.network_filter.looks_like_ai_endpoint(url, Some(method)) {
            return false;
        }
        self.network.begin(request_id, url, at);
        tracing::debug!(request_id, url, "tracking network request");
        true
    }

    pub async fn on_request_completed(&self, request_id: &str, at: Millis) -> EndOutcome {
        self.finish(&self.network, request_id, at).await
    }

    /// Failed requests are charged exactly like completed ones.
    pub async fn on_request_failed(&self, request_id: &str, at: Millis) -> EndOutcome {
        self.finish(&self.network, request_id, at).await
    }

    /// In-page `REQUEST_START`. Returns whether the request is now tracked.
    pub fn on_page_start(
        &self,
        request_id: &str,
        url: &str,
        platform_hint: Option<String>,
        at: Millis,
    ) -> bool {
        if !self.page_filter.looks_like_ai_endpoint(url, None) {
            return false;
        }
        self.page.begin_with_hint(request_id, url, platform_hint, at);
        tracing::debug!(request_id, url, "tracking page request");
        true
    }

    pub async fn on_page_end(&self, request_id: &str, at: Millis) -> EndOutcome {
        self.finish(&self.page, request_id, at).await
    }

    /// Dispatch a decoded inbound event; a missing `at` means now.
    pub async fn handle(&self, event: InboundEvent) -> Handled {
        let at = event.at().unwrap_or_else(now_ms);
        match event {
            InboundEvent::Network(NetworkEvent::Begin {
                request_id,
                url,
                method,
                ..
            }) => Handled::Begin {
                tracked: self.on_request_begin(&request_id, &url, &method, at),
            },
            InboundEvent::Network(NetworkEvent::Completed { request_id, .. }) => {
                Handled::End(self.on_request_completed(&request_id, at).await)
            }
            InboundEvent::Network(NetworkEvent::Failed { request_id, .. }) => {
                Handled::End(self.on_request_failed(&request_id, at).await)
            }
            InboundEvent::Page(PageMessage::RequestStart {
                request_id,
                url,
                platform_hint,
                ..
            }) => Handled::Begin {
                tracked: self.on_page_start(&request_id, &url, platform_hint, at),
            },
            InboundEvent::Page(PageMessage::RequestEnd { request_id, .. }) => {
                Handled::End(self.on_page_end(&request_id, at).await)
            }
        }
    }

    async fn finish(&self, table: &PendingTable, request_id: &str, at: Millis) -> EndOutcome {
        let Some(done) = table.end(request_id, at) else {
            tracing::debug!(source = table.name(), request_id, "end without pending request");
            return EndOutcome::NotFound;
        };

        let Some(platform) = self.platform_for(&done) else {
            tracing::debug!(source = table.name(), url = %done.url, "unrecognized platform");
            self.aggregator
                .log_best_effort(at, format!("Unrecognized platform for {}", done.url))
                .await;
            return EndOutcome::Discarded;
        };

        match self
            .aggregator
            .record_at(&platform, done.duration_ms, &done.url, at)
            .await
        {
            RecordOutcome::Aggregated(a) => EndOutcome::Aggregated(a),
            RecordOutcome::Discarded => EndOutcome::Discarded,
            RecordOutcome::Dropped => EndOutcome::Dropped,
        }
    }

    /// The URL decides; a source hint is used only when the URL is unrecognized.
    fn platform_for(&self, done: &CompletedRequest) -> Option<PlatformId> {
        self.classifier
            .classify(&done.url)
            .filter(|p| self.aggregator.profiles().contains(p))
            .or_else(|| {
                done.platform_hint
                    .as_deref()
                    .and_then(|h| self.aggregator.profiles().resolve_hint(h))
            })
    }

    /// Evict pending requests that outlived the maximum age. Returns the count.
    pub async fn sweep(&self, now: Millis) -> usize {
        let mut total = 0;
        for table in [&self.network, &self.page] {
            let evicted = table.sweep(now);
            if evicted.is_empty() {
                continue;
            }
            for req in &evicted {
                tracing::debug!(
                    source = table.name(),
                    request_id = %req.request_id,
                    url = %req.source_url,
                    "evicted stale pending request"
                );
            }
            self.aggregator
                .log_best_effort(
                    now,
                    format!(
                        "Evicted {} stale pending request(s) from {} source",
                        evicted.len(),
                        table.name()
                    ),
                )
                .await;
            total += evicted.len();
        }
        total
    }

    /// (network, page) pending counts.
    pub fn pending_counts(&self) -> (usize, usize) {
        (self.network.len(), self.page.len())
    }

    pub async fn aggregates(&self) -> Result<BTreeMap<PlatformId, PlatformAggregate>> {
        self.aggregator.store().aggregates().await
    }

    pub async fn diagnostic_log(&self) -> Result<Vec<EventLogEntry>> {
        self.aggregator.store().diagnostic_log().await
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        self.aggregator.store().history().await
    }

    pub async fn daily_stats(&self, days: usize) -> Result<Vec<DailyStat>> {
        self.aggregator.store().daily_stats(days).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.aggregator.store().snapshot().await
    }

    pub async fn reset_all(&self) -> Result<()> {
        self.aggregator.reset().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AggregatesChanged> {
        self.aggregator.subscribe()
    }
}

/// Sweep both pending tables every `period` until the handle is aborted.
pub fn spawn_sweeper<S: AggregateStore>(tracker: Arc<Tracker<S>>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = tracker.sweep(now_ms()).await;
            if evicted > 0 {
                tracing::info!(evicted, "swept stale pending requests");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Capacities, MemoryStore};

    fn tracker() -> Tracker<MemoryStore> {
        Tracker::new(
            Arc::new(MemoryStore::new(Capacities::default())),
            &EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_get_request_is_not_tracked() {
        let t = tracker();
        assert!(!t.on_request_begin("1", "https://chatgpt.com/backend-api/x", "GET", 0));
        assert_eq!(t.on_request_completed("1", 10).await, EndOutcome::NotFound);
        assert!(t.aggregates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_platform_is_discarded_and_logged() {
        let t = tracker();
        assert!(t.on_request_begin("1", "https://example.com/api/chat", "POST", 0));
        assert_eq!(t.on_request_completed("1", 10).await, EndOutcome::Discarded);
        assert!(t.aggregates().await.unwrap().is_empty());
        let log = t.diagnostic_log().await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].message.contains("example.com"));
    }

    #[tokio::test]
    async fn test_failed_request_is_charged() {
        let t = tracker();
        t.on_request_begin("9", "https://claude.ai/api/append_message", "POST", 0);
        let outcome = t.on_request_failed("9", 2_000).await;
        let EndOutcome::Aggregated(a) = outcome else {
            panic!("expected aggregate, got {outcome:?}");
        };
        assert_eq!(a.query_count, 1);
        assert_eq!(a.cumulative_seconds, 2.0);
    }

    #[tokio::test]
    async fn test_page_hint_used_for_relative_url() {
        let t = tracker();
        assert!(t.on_page_start("p1", "/api/organizations/x/completion", Some("Claude".into()), 0));
        let outcome = t.on_page_end("p1", 500).await;
        assert!(matches!(outcome, EndOutcome::Aggregated(ref a) if a.display_name == "Claude"));
    }

    #[tokio::test]
    async fn test_url_beats_hint() {
        let t = tracker();
        t.on_page_start("p1", "https://chatgpt.com/backend-api/x", Some("Claude".into()), 0);
        t.on_page_end("p1", 100).await;
        let aggs = t.aggregates().await.unwrap();
        assert!(aggs.contains_key(&PlatformId::new("chatgpt")));
        assert!(!aggs.contains_key(&PlatformId::new("claude")));
    }

    #[tokio::test]
    async fn test_sources_are_independent() {
        let t = tracker();
        t.on_request_begin("1", "https://chatgpt.com/backend-api/x", "POST", 0);
        t.on_page_start("1", "https://chatgpt.com/backend-api/x", None, 0);
        assert_eq!(t.pending_counts(), (1, 1));

        t.on_request_completed("1", 100).await;
        t.on_page_end("1", 100).await;
        let aggs = t.aggregates().await.unwrap();
        assert_eq!(aggs[&PlatformId::new("chatgpt")].query_count, 2);
    }

    #[tokio::test]
    async fn test_sweep_logs_and_forgets() {
        let mut config = EngineConfig::default();
        config.pending.max_age_secs = Some(1);
        let t = Tracker::new(Arc::new(MemoryStore::default()), &config);
        t.on_request_begin("1", "https://grok.com/rest/app-chat/conversations/new", "POST", 0);
        t.on_request_begin("2", "https://grok.com/rest/app-chat/conversations/other", "POST", 1_500);

        assert_eq!(t.sweep(2_000).await, 1);
        assert_eq!(t.pending_counts(), (1, 0));
        assert_eq!(t.on_request_completed("1", 2_100).await, EndOutcome::NotFound);
        assert!(matches!(
            t.on_request_completed("2", 2_100).await,
            EndOutcome::Aggregated(_)
        ));
        let log = t.diagnostic_log().await.unwrap();
        assert!(log[0].message.starts_with("Evicted 1 stale"));
    }

    #[tokio::test]
    async fn test_handle_dispatches() {
        let t = tracker();
        let begin = crate::events::decode_line(
            r#"{"event":"begin","requestId":"a","url":"https://poe.com/api/gql_POST","method":"POST","at":0}"#,
        )
        .unwrap()
        .unwrap();
        let end = crate::events::decode_line(r#"{"event":"completed","requestId":"a","at":250}"#)
            .unwrap()
            .unwrap();
        assert_eq!(t.handle(begin).await, Handled::Begin { tracked: true });
        assert!(matches!(
            t.handle(end).await,
            Handled::End(EndOutcome::Aggregated(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_runs() {
        let mut config = EngineConfig::default();
        config.pending.max_age_secs = Some(0);
        let t = Arc::new(Tracker::new(Arc::new(MemoryStore::default()), &config));
        t.on_request_begin("1", "https://claude.ai/api/x", "POST", 0);

        let handle = spawn_sweeper(Arc::clone(&t), Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        handle.abort();
        assert_eq!(t.pending_counts(), (0, 0));
    }
}
