//! Replay JSON-lines request events through the tracker.
//!
//! Stale pending requests are swept on the event clock (the latest `at`
//! seen), so replaying an old capture evicts exactly what a live session
//! would have evicted.

use crate::error::Result;
use crate::events::decode_line;
use crate::pending::{Millis, now_ms};
use crate::store::AggregateStore;
use crate::tracker::{EndOutcome, Handled, Tracker};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub lines: u64,
    pub malformed: u64,
    pub tracked: u64,
    pub filtered: u64,
    pub aggregated: u64,
    pub discarded: u64,
    pub dropped: u64,
    pub unmatched: u64,
    pub evicted: u64,
    pub still_pending: u64,
}

impl IngestSummary {
    fn count(&mut self, handled: &Handled) {
        match handled {
            Handled::Begin { tracked: true } => self.tracked += 1,
            Handled::Begin { tracked: false } => self.filtered += 1,
            Handled::End(EndOutcome::Aggregated(_)) => self.aggregated += 1,
            Handled::End(EndOutcome::Discarded) => self.discarded += 1,
            Handled::End(EndOutcome::Dropped) => self.dropped += 1,
            Handled::End(EndOutcome::NotFound) => self.unmatched += 1,
        }
    }
}

pub async fn ingest<S, R>(
    tracker: &Tracker<S>,
    reader: R,
    sweep_every: Duration,
) -> Result<IngestSummary>
where
    S: AggregateStore,
    R: AsyncBufRead + Unpin,
{
    let sweep_ms = sweep_every.as_millis() as Millis;
    let mut summary = IngestSummary::default();
    let mut clock: Option<Millis> = None;
    let mut last_sweep: Option<Millis> = None;
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        summary.lines += 1;
        let event = match decode_line(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(line = summary.lines, error = %e, "skipping malformed event");
                summary.malformed += 1;
                continue;
            }
        };

        let at = event.at().unwrap_or_else(now_ms);
        let now = clock.map_or(at, |c| c.max(at));
        clock = Some(now);

        match last_sweep {
            None => last_sweep = Some(now),
            Some(prev) if now - prev >= sweep_ms => {
                summary.evicted += tracker.sweep(now).await as u64;
                last_sweep = Some(now);
            }
            Some(_) => {}
        }

        let handled = tracker.handle(event).await;
        summary.count(&handled);
    }

    if let Some(now) = clock {
        summary.evicted += tracker.sweep(now).await as u64;
    }
    let (network, page) = tracker.pending_counts();
    summary.still_pending = (network + page) as u64;
    Ok(summary)
}

pub async fn run<S: AggregateStore>(
    tracker: &Tracker<S>,
    file: &Path,
    sweep_every: Duration,
) -> Result<()> {
    let summary = if file.as_os_str() == "-" {
        ingest(tracker, BufReader::new(tokio::io::stdin()), sweep_every).await?
    } else {
        let f = tokio::fs::File::open(file).await?;
        ingest(tracker, BufReader::new(f), sweep_every).await?
    };

    tracing::info!(?summary, "ingest finished");
    eprintln!(
        "{} lines: {} aggregated, {} unrecognized, {} dropped, {} unmatched ends",
        summary.lines, summary.aggregated, summary.discarded, summary.dropped, summary.unmatched
    );
    eprintln!(
        "{} begins tracked, {} filtered, {} evicted, {} still pending, {} malformed",
        summary.tracked, summary.filtered, summary.evicted, summary.still_pending, summary.malformed
    );
    Ok(())
}
