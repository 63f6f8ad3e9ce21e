mod app;
mod ui;

use crate::error::Result;
use crate::metrics::MetricsAggregator;
use crate::store::AggregateStore;
use std::time::Duration;
use tokio::runtime::Runtime;

pub use app::App;

/// Run the live viewer until the user quits. Must not be called from
/// inside the runtime.
pub fn run<S: AggregateStore>(
    rt: &Runtime,
    aggregator: &MetricsAggregator<S>,
    refresh: Duration,
) -> Result<()> {
    let mut app = App::new(rt, aggregator, refresh);
    app.run()
}
