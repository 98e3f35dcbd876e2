//! Observability: runtime telemetry (metrics) and sink abstractions.
//!
//! Tracking logic never touches `obs::metrics` directly; every counter
//! update flows through `MetricsEvent` and a `MetricsSink`.

pub(crate) mod metrics;
pub(crate) mod sink;

// re-exports
pub use metrics::{EntityCounters, EntitySummary, EventOps, EventReport, EventState};
pub use sink::{MetricsEvent, MetricsSink, metrics_report, metrics_reset_all};
