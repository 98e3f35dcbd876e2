use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

///
/// EventState
/// Ephemeral, in-memory counters for tracking operations.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EventState {
    pub ops: EventOps,
    pub entities: BTreeMap<String, EntityCounters>,
    pub window_start_ms: u64,
}

impl Default for EventState {
    fn default() -> Self {
        Self {
            ops: EventOps::default(),
            entities: BTreeMap::new(),
            window_start_ms: now_millis(),
        }
    }
}

///
/// EventOps
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventOps {
    // Entry lifecycle
    pub entries_created: u64,
    pub tracking_started: u64,
    pub tracking_stopped: u64,
    pub identity_conflicts: u64,

    // Materialization
    pub materialize_hits: u64,
    pub materialize_misses: u64,

    // Change detection
    pub detect_changes_calls: u64,
    pub entries_scanned: u64,
    pub entries_changed: u64,

    // Generation
    pub values_generated: u64,

    // Save
    pub save_calls: u64,
    pub save_entries: u64,
    pub rows_saved: u64,
    pub save_failures: u64,
}

///
/// EntityCounters
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EntityCounters {
    pub entries_created: u64,
    pub tracking_started: u64,
    pub tracking_stopped: u64,
    pub identity_conflicts: u64,
    pub materialize_hits: u64,
    pub materialize_misses: u64,
    pub values_generated: u64,
}

thread_local! {
    static EVENT_STATE: RefCell<EventState> = RefCell::new(EventState::default());
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Borrow metrics immutably.
pub(crate) fn with_state<R>(f: impl FnOnce(&EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&m.borrow()))
}

/// Borrow metrics mutably.
pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&mut m.borrow_mut()))
}

/// Per-entity counters, created on first use.
pub(crate) fn entity_counters<'a>(m: &'a mut EventState, entity: &str) -> &'a mut EntityCounters {
    m.entities.entry(entity.to_string()).or_default()
}

/// Reset all counters and restart the window.
pub(crate) fn reset_all() {
    with_state_mut(|m| *m = EventState::default());
}

///
/// EventReport
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventReport {
    /// Ephemeral runtime counters since `window_start_ms`.
    pub counters: Option<EventState>,
    /// Per-entity counters with derived ratios.
    pub entity_counters: Vec<EntitySummary>,
}

///
/// EntitySummary
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EntitySummary {
    pub entity: String,
    pub entries_created: u64,
    pub tracking_started: u64,
    pub tracking_stopped: u64,
    pub identity_conflicts: u64,
    pub materialize_hits: u64,
    pub materialize_misses: u64,
    pub materialize_hit_ratio: f64,
    pub values_generated: u64,
}

/// Build a report from in-memory counters.
///
/// Returns an empty report when `window_start_ms` is after the current
/// window start.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub(crate) fn report_window_start(window_start_ms: Option<u64>) -> EventReport {
    let snap = with_state(Clone::clone);
    if window_start_ms.is_some_and(|start| start > snap.window_start_ms) {
        return EventReport::default();
    }

    let mut entity_counters: Vec<EntitySummary> = snap
        .entities
        .iter()
        .map(|(entity, c)| {
            let lookups = c.materialize_hits + c.materialize_misses;
            let ratio = if lookups > 0 {
                c.materialize_hits as f64 / lookups as f64
            } else {
                0.0
            };

            EntitySummary {
                entity: entity.clone(),
                entries_created: c.entries_created,
                tracking_started: c.tracking_started,
                tracking_stopped: c.tracking_stopped,
                identity_conflicts: c.identity_conflicts,
                materialize_hits: c.materialize_hits,
                materialize_misses: c.materialize_misses,
                materialize_hit_ratio: ratio,
                values_generated: c.values_generated,
            }
        })
        .collect();

    // Busiest entity types first, then by name.
    entity_counters.sort_by(|a, b| match b.tracking_started.cmp(&a.tracking_started) {
        Ordering::Equal => a.entity.cmp(&b.entity),
        other => other,
    });

    EventReport {
        counters: Some(snap),
        entity_counters,
    }
}

///
/// TESTS
///
