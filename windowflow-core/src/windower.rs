//! Window assignment. Given the event time of an event (and for session windows the open windows
//! of its key) the [WindowAssigner] computes the window(s) the event belongs to as a list of
//! [WindowOperation]s which the shard applies to its [WindowStateStore] in order.
//!
//! Tumbling and Sliding windows are aligned, the boundaries are a pure function of the event time.
//! Session windows are unaligned, the boundaries are only known in retrospect.

use std::cmp::Ordering;
use std::fmt;

use crate::Error;
use crate::Result;
use crate::config::{WindowConfig, WindowKind, WindowKindTag};
use crate::store::WindowStateStore;

/// Session Window Operations.
pub(crate) mod session;
/// Sliding Window Operations.
pub(crate) mod sliding;
/// Tumbling Window Operations.
pub(crate) mod tumbling;

pub use session::SessionAssigner;
pub use sliding::SlidingAssigner;
pub use tumbling::TumblingAssigner;

/// A Window is represented by its start and end time in milliseconds. When sorted, windows are
/// sorted by the end time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    /// Start time of the window (inclusive).
    pub start: i64,
    /// End time of the window.
    pub end: i64,
}

impl Window {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Half-open membership `[start, end)`.
    pub fn contains(&self, event_time: i64) -> bool {
        self.start <= event_time && event_time < self.end
    }
}

impl Ord for Window {
    fn cmp(&self, other: &Self) -> Ordering {
        self.end
            .cmp(&other.end)
            .then_with(|| self.start.cmp(&other.start))
    }
}

impl PartialOrd for Window {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {})", self.start, self.end)
    }
}

/// Truncates a timestamp to the nearest multiple of the given duration, rounding towards negative
/// infinity. None if the multiple does not fit in an i64.
pub(crate) fn truncate_to_duration(timestamp_millis: i64, duration_millis: i64) -> Option<i64> {
    timestamp_millis
        .div_euclid(duration_millis)
        .checked_mul(duration_millis)
}

/// Error for an event time whose window boundaries overflow i64.
pub(crate) fn unrepresentable(event_time: i64) -> Error {
    Error::Validation(format!(
        "event time {event_time} does not fit in any window"
    ))
}

/// Window operations derived from the event and the window kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WindowOperation {
    /// Open creates a new window instance and appends the event to it.
    Open(Window),
    /// Append adds the event to the existing window instance starting at the window's start.
    Append(Window),
    /// Close fires the window instance right away, without waiting for the trigger.
    Close(Window),
}

/// Assigns events to windows, one variant per window kind.
#[derive(Debug, Clone)]
pub enum WindowAssigner {
    Tumbling(TumblingAssigner),
    Sliding(SlidingAssigner),
    Session(SessionAssigner),
}

impl From<&WindowConfig> for WindowAssigner {
    fn from(config: &WindowConfig) -> Self {
        match config.kind() {
            WindowKind::Tumbling { size } => WindowAssigner::Tumbling(TumblingAssigner::new(size)),
            WindowKind::Sliding { size, slide } => {
                WindowAssigner::Sliding(SlidingAssigner::new(size, slide))
            }
            WindowKind::Session { timeout } => {
                WindowAssigner::Session(SessionAssigner::new(timeout))
            }
        }
    }
}

impl WindowAssigner {
    pub fn kind(&self) -> WindowKindTag {
        match self {
            WindowAssigner::Tumbling(_) => WindowKindTag::Tumbling,
            WindowAssigner::Sliding(_) => WindowKindTag::Sliding,
            WindowAssigner::Session(_) => WindowKindTag::Session,
        }
    }

    /// Windows the event time falls in, without looking at any state. For session windows this is
    /// the single point window a new session would start with. None if a window boundary
    /// overflows.
    pub fn windows_for(&self, event_time: i64) -> Option<Vec<Window>> {
        match self {
            WindowAssigner::Tumbling(assigner) => Some(vec![assigner.window_for(event_time)?]),
            WindowAssigner::Sliding(assigner) => assigner.windows_for(event_time),
            WindowAssigner::Session(_) => Some(vec![Window::new(event_time, event_time)]),
        }
    }

    /// Assigns windows to an event of the given key. There can be more than one for Sliding
    /// Window, and a Session Window may close the previous session of the key. Returns
    /// [Error::Validation] if the window of the event time cannot be represented.
    pub(crate) fn assign(
        &self,
        key: &str,
        event_time: i64,
        store: &WindowStateStore,
    ) -> Result<Vec<WindowOperation>> {
        match self {
            WindowAssigner::Tumbling(assigner) => assigner.assign(key, event_time, store),
            WindowAssigner::Sliding(assigner) => assigner.assign(key, event_time, store),
            WindowAssigner::Session(assigner) => Ok(assigner.assign(key, event_time, store)),
        }
    }
}

/// Open for windows the store does not have yet, Append otherwise.
pub(crate) fn open_or_append(
    key: &str,
    windows: Vec<Window>,
    store: &WindowStateStore,
) -> Vec<WindowOperation> {
    windows
        .into_iter()
        .map(|window| {
            if store.contains(key, window.start) {
                WindowOperation::Append(window)
            } else {
                WindowOperation::Open(window)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    #[test]
    fn test_truncate_to_duration() {
        assert_eq!(truncate_to_duration(4999, 5000), Some(0));
        assert_eq!(truncate_to_duration(5000, 5000), Some(5000));
        assert_eq!(truncate_to_duration(-1, 5000), Some(-5000));
        assert_eq!(truncate_to_duration(i64::MIN, 5000), None);
    }

    #[test]
    fn test_window_ordering_by_end_time() {
        let windows: BTreeSet<Window> = [
            Window::new(2000, 7000),
            Window::new(0, 5000),
            Window::new(-2000, 3000),
        ]
        .into_iter()
        .collect();

        let ends: Vec<i64> = windows.iter().map(|w| w.end).collect();
        assert_eq!(ends, vec![3000, 5000, 7000]);
    }

    #[test]
    fn test_assigner_from_config() {
        let config = WindowConfig::sliding(Duration::from_secs(5), None).unwrap();
        let assigner = WindowAssigner::from(&config);
        assert_eq!(assigner.kind(), WindowKindTag::Sliding);
        // slide defaulted to size, behaves like tumbling
        assert_eq!(
            assigner.windows_for(5000),
            Some(vec![Window::new(5000, 10000)])
        );

        let config = WindowConfig::session(Duration::from_secs(2)).unwrap();
        let assigner = WindowAssigner::from(&config);
        assert_eq!(assigner.windows_for(42), Some(vec![Window::new(42, 42)]));
    }
}
