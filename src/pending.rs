//! Correlation of begin and end signals for in-flight requests.
//!
//! One [`PendingTable`] exists per signal source. Entries are keyed by the
//! source-assigned request id; a repeated begin overwrites, and the first
//! end removes. Requests that never end are evicted by [`PendingTable::sweep`].

use std::collections::HashMap;
use std::sync::Mutex;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

pub fn now_ms() -> Millis {
    chrono::Utc::now().timestamp_millis()
}

/// An in-flight request waiting for its end signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub request_id: String,
    pub started_at: Millis,
    pub source_url: String,
    /// Platform suggested by the signal source, if any.
    pub platform_hint: Option<String>,
}

/// A request whose end signal matched a pending entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRequest {
    pub url: String,
    pub duration_ms: u64,
    pub platform_hint: Option<String>,
}

pub struct PendingTable {
    name: &'static str,
    max_age_ms: u64,
    entries: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingTable {
    pub fn new(name: &'static str, max_age_ms: u64) -> Self {
        PendingTable {
            name,
            max_age_ms,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Insert or overwrite the entry for `request_id`.
    pub fn begin(&self, request_id: &str, url: &str, started_at: Millis) {
        self.begin_with_hint(request_id, url, None, started_at);
    }

    pub fn begin_with_hint(
        &self,
        request_id: &str,
        url: &str,
        platform_hint: Option<String>,
        started_at: Millis,
    ) {
        let entry = PendingRequest {
            request_id: request_id.to_string(),
            started_at,
            source_url: url.to_string(),
            platform_hint,
        };
        let replaced = self.lock().insert(request_id.to_string(), entry);
        if replaced.is_some() {
            tracing::debug!(source = self.name, request_id, "begin overwrote pending request");
        }
    }

    /// Remove and return the entry for `request_id`, or `None` if untracked.
    ///
    /// A clock that runs backwards yields a zero duration.
    pub fn end(&self, request_id: &str, ended_at: Millis) -> Option<CompletedRequest> {
        let entry = self.lock().remove(request_id)?;
        let duration_ms = ended_at.saturating_sub(entry.started_at).max(0) as u64;
        Some(CompletedRequest {
            url: entry.source_url,
            duration_ms,
            platform_hint: entry.platform_hint,
        })
    }

    /// Evict entries older than the configured maximum age.
    pub fn sweep(&self, now: Millis) -> Vec<PendingRequest> {
        let max_age = i64::try_from(self.max_age_ms).unwrap_or(i64::MAX);
        let mut entries = self.lock();
        let stale: Vec<String> = entries
            .values()
            .filter(|e| now.saturating_sub(e.started_at) > max_age)
            .map(|e| e.request_id.clone())
            .collect();
        stale
            .iter()
            .filter_map(|id| entries.remove(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.lock().contains_key(request_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingRequest>> {
        // The map holds plain data; a panic mid-insert cannot leave it inconsistent.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
