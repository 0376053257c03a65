//! Counters exposed to the metrics collaborator. The engine does not export them itself, the
//! caller registers them into its own [Registry].

use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

// The top-level prefix of all the windowing metrics
const WINDOWFLOW_REGISTRY_PREFIX: &str = "windowflow";

// counters (the prometheus client adds the _total suffix)
const EVENTS_PROCESSED: &str = "events_processed";
const WINDOWS_TRIGGERED: &str = "windows_triggered";
const EVENTS_IN_WINDOWS: &str = "events_in_windows";
const EVENTS_DROPPED_INVALID: &str = "events_dropped_invalid";
const EVENTS_DROPPED_LATE: &str = "events_dropped_late";

/// Counters shared by all the shards of a processor. Cloning shares the underlying counters.
#[derive(Debug, Clone, Default)]
pub struct WindowMetrics {
    /// valid events taken off the ingestion queues
    pub(crate) events_processed: Counter,
    /// windows fired and emitted
    pub(crate) windows_triggered: Counter,
    /// sum of the event counts of the fired windows
    pub(crate) events_in_windows: Counter,
    pub(crate) events_dropped_invalid: Counter,
    pub(crate) events_dropped_late: Counter,
}

/// Point in time copy of [WindowMetrics].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_processed: u64,
    pub windows_triggered: u64,
    pub events_in_windows: u64,
    pub events_dropped_invalid: u64,
    pub events_dropped_late: u64,
}

impl WindowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the counters under the `windowflow` prefix.
    pub fn register(&self, registry: &mut Registry) {
        let registry = registry.sub_registry_with_prefix(WINDOWFLOW_REGISTRY_PREFIX);
        registry.register(
            EVENTS_PROCESSED,
            "A Counter to keep track of the total number of valid events processed",
            self.events_processed.clone(),
        );
        registry.register(
            WINDOWS_TRIGGERED,
            "A Counter to keep track of the total number of windows fired",
            self.windows_triggered.clone(),
        );
        registry.register(
            EVENTS_IN_WINDOWS,
            "A Counter to keep track of the total number of events in fired windows",
            self.events_in_windows.clone(),
        );
        registry.register(
            EVENTS_DROPPED_INVALID,
            "A Counter to keep track of the total number of events dropped as invalid",
            self.events_dropped_invalid.clone(),
        );
        registry.register(
            EVENTS_DROPPED_LATE,
            "A Counter to keep track of the total number of events dropped as late",
            self.events_dropped_late.clone(),
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_processed: self.events_processed.get(),
            windows_triggered: self.windows_triggered.get(),
            events_in_windows: self.events_in_windows.get(),
            events_dropped_invalid: self.events_dropped_invalid.get(),
            events_dropped_late: self.events_dropped_late.get(),
        }
    }
}
