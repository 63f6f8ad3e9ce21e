mod aggregator;
pub mod impact;
mod model;

pub use aggregator::{AggregatesChanged, MetricsAggregator, RecordOutcome};
pub use impact::Equivalents;
pub use model::{CorrectionModel, DerivedMetrics};
