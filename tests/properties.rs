use envirotrack::config::EngineConfig;
use envirotrack::platform::PlatformId;
use envirotrack::store::MemoryStore;
use envirotrack::tracker::{EndOutcome, Tracker};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Begin(u8),
    Complete(u8),
    Fail(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6).prop_map(Op::Begin),
        (0u8..6).prop_map(Op::Complete),
        (0u8..6).prop_map(Op::Fail),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn query_count_equals_matched_ends(ops in proptest::collection::vec(op(), 0..60)) {
        let rt = runtime();
        let (count, matched, pending) = rt.block_on(async {
            let t = Tracker::new(Arc::new(MemoryStore::default()), &EngineConfig::default());
            let mut open = HashSet::new();
            let mut matched = 0u64;
            for (at, op) in ops.iter().enumerate() {
                let at = at as i64 * 10;
                match op {
                    Op::Begin(id) => {
                        t.on_request_begin(&id.to_string(), "https://claude.ai/api/x", "POST", at);
                        open.insert(*id);
                    }
                    Op::Complete(id) | Op::Fail(id) => {
                        let outcome = if matches!(op, Op::Complete(_)) {
                            t.on_request_completed(&id.to_string(), at).await
                        } else {
                            t.on_request_failed(&id.to_string(), at).await
                        };
                        let was_open = open.remove(id);
                        assert_eq!(was_open, outcome != EndOutcome::NotFound);
                        if was_open {
                            matched += 1;
                        }
                    }
                }
            }
            let count = t
                .aggregates()
                .await
                .unwrap()
                .get(&PlatformId::new("claude"))
                .map_or(0, |a| a.query_count);
            (count, matched, t.pending_counts().0)
        });
        prop_assert_eq!(count, matched);
        prop_assert!(pending <= 6);
    }

    #[test]
    fn cumulative_seconds_equal_sum_of_durations(durations in proptest::collection::vec(0i64..120_000, 1..30)) {
        let rt = runtime();
        let secs = rt.block_on(async {
            let t = Tracker::new(Arc::new(MemoryStore::default()), &EngineConfig::default());
            for (i, d) in durations.iter().enumerate() {
                let id = i.to_string();
                t.on_request_begin(&id, "https://chatgpt.com/backend-api/conversation", "POST", 0);
                t.on_request_completed(&id, *d).await;
            }
            t.aggregates().await.unwrap()[&PlatformId::new("chatgpt")].cumulative_seconds
        });
        let expected: f64 = durations.iter().map(|d| *d as f64 / 1000.0).sum();
        prop_assert!((secs - expected).abs() < 1e-6);
    }
}
