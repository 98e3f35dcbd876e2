//! Metrics sink boundary.
//!
//! Tracking logic MUST NOT depend on obs::metrics directly.
//! All instrumentation flows through MetricsEvent and MetricsSink.
//!
//! This module is the only allowed bridge between tracking logic
//! and the thread-local metrics state.
use crate::obs::metrics::{self, entity_counters};

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricsEvent {
    EntryCreated {
        entity: &'static str,
    },
    TrackingStarted {
        entity: &'static str,
    },
    TrackingStopped {
        entity: &'static str,
    },
    MaterializeHit {
        entity: &'static str,
    },
    MaterializeMiss {
        entity: &'static str,
    },
    IdentityConflict {
        entity: &'static str,
    },
    DetectChanges {
        entries_scanned: u64,
        entries_changed: u64,
    },
    ValuesGenerated {
        entity: &'static str,
        count: u64,
    },
    SaveStart {
        entries: u64,
    },
    SaveFinish {
        rows: u64,
    },
    SaveFailed,
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent);
}

/// GlobalMetricsSink
/// Default process-local sink that writes into thread-local metrics state.
/// Used whenever a session has no sink of its own.

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent) {
        metrics::with_state_mut(|m| match event {
            MetricsEvent::EntryCreated { entity } => {
                m.ops.entries_created = m.ops.entries_created.saturating_add(1);
                let entry = entity_counters(m, entity);
                entry.entries_created = entry.entries_created.saturating_add(1);
            }

            MetricsEvent::TrackingStarted { entity } => {
                m.ops.tracking_started = m.ops.tracking_started.saturating_add(1);
                let entry = entity_counters(m, entity);
                entry.tracking_started = entry.tracking_started.saturating_add(1);
            }

            MetricsEvent::TrackingStopped { entity } => {
                m.ops.tracking_stopped = m.ops.tracking_stopped.saturating_add(1);
                let entry = entity_counters(m, entity);
                entry.tracking_stopped = entry.tracking_stopped.saturating_add(1);
            }

            MetricsEvent::MaterializeHit { entity } => {
                m.ops.materialize_hits = m.ops.materialize_hits.saturating_add(1);
                let entry = entity_counters(m, entity);
                entry.materialize_hits = entry.materialize_hits.saturating_add(1);
            }

            MetricsEvent::MaterializeMiss { entity } => {
                m.ops.materialize_misses = m.ops.materialize_misses.saturating_add(1);
                let entry = entity_counters(m, entity);
                entry.materialize_misses = entry.materialize_misses.saturating_add(1);
            }

            MetricsEvent::IdentityConflict { entity } => {
                m.ops.identity_conflicts = m.ops.identity_conflicts.saturating_add(1);
                let entry = entity_counters(m, entity);
                entry.identity_conflicts = entry.identity_conflicts.saturating_add(1);
            }

            MetricsEvent::DetectChanges {
                entries_scanned,
                entries_changed,
            } => {
                m.ops.detect_changes_calls = m.ops.detect_changes_calls.saturating_add(1);
                m.ops.entries_scanned = m.ops.entries_scanned.saturating_add(entries_scanned);
                m.ops.entries_changed = m.ops.entries_changed.saturating_add(entries_changed);
            }

            MetricsEvent::ValuesGenerated { entity, count } => {
                m.ops.values_generated = m.ops.values_generated.saturating_add(count);
                let entry = entity_counters(m, entity);
                entry.values_generated = entry.values_generated.saturating_add(count);
            }

            MetricsEvent::SaveStart { entries } => {
                m.ops.save_calls = m.ops.save_calls.saturating_add(1);
                m.ops.save_entries = m.ops.save_entries.saturating_add(entries);
            }

            MetricsEvent::SaveFinish { rows } => {
                m.ops.rows_saved = m.ops.rows_saved.saturating_add(rows);
            }

            MetricsEvent::SaveFailed => {
                m.ops.save_failures = m.ops.save_failures.saturating_add(1);
            }
        });
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

/// Route one event to the session sink, or the global sink when unset.
pub(crate) fn record(sink: Option<&dyn MetricsSink>, event: MetricsEvent) {
    match sink {
        Some(sink) => sink.record(event),
        None => GLOBAL_METRICS_SINK.record(event),
    }
}

/// Snapshot the current metrics state.
///
/// `window_start_ms` filters by window start (`EventState::window_start_ms`),
/// not by per-event timestamps.
#[must_use]
pub fn metrics_report(window_start_ms: Option<u64>) -> metrics::EventReport {
    metrics::report_window_start(window_start_ms)
}

/// Reset all metrics state.
pub fn metrics_reset_all() {
    metrics::reset_all();
}
