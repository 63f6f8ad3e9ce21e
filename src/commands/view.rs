use crate::error::Result;
use crate::metrics::MetricsAggregator;
use crate::store::AggregateStore;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Open the live viewer, continuing the store's `last_update` sequence so a
/// reset issued from the viewer is ordered after every recorded merge.
pub fn run<S: AggregateStore>(
    rt: &Runtime,
    aggregator: &MetricsAggregator<S>,
    refresh: Duration,
) -> Result<()> {
    let last_update = rt.block_on(aggregator.store().last_update())?;
    aggregator.resume_from(last_update);
    crate::tui::run(rt, aggregator, refresh)
}
