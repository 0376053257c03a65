//! Decides when a window fires. Tumbling and Sliding windows fire once "now" reaches the window end
//! plus the allowed lateness, which is a processing-time approximation of a watermark. Session
//! windows are fired by the gap detection in the session assigner and by the drain on shutdown.

use crate::config::{WindowConfig, WindowKind, duration_millis};
use crate::store::WindowInstance;
use crate::windower::Window;

/// Returns true if the gap between the last event of a session and the new event is larger than
/// the session timeout. Out of order events (negative gap) never exceed it.
pub(crate) fn gap_exceeded(last_event_time: i64, event_time: i64, timeout_millis: i64) -> bool {
    event_time.saturating_sub(last_event_time) > timeout_millis
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPolicy {
    /// Fires when `now >= window.end + allowed_lateness`.
    Deadline { allowed_lateness_millis: i64 },
    /// Fires when the session assigner detects a gap larger than the session timeout.
    SessionGap,
}

impl From<&WindowConfig> for TriggerPolicy {
    fn from(config: &WindowConfig) -> Self {
        match config.kind() {
            WindowKind::Tumbling { .. } | WindowKind::Sliding { .. } => TriggerPolicy::Deadline {
                allowed_lateness_millis: duration_millis(config.allowed_lateness()),
            },
            WindowKind::Session { .. } => TriggerPolicy::SessionGap,
        }
    }
}

impl TriggerPolicy {
    /// Time at which the window is forced to fire, None for session windows.
    pub fn deadline(&self, window: &Window) -> Option<i64> {
        match self {
            TriggerPolicy::Deadline {
                allowed_lateness_millis,
            } => Some(window.end.saturating_add(*allowed_lateness_millis)),
            TriggerPolicy::SessionGap => None,
        }
    }

    /// Whether an open instance should fire at `now`.
    pub fn should_fire(&self, instance: &WindowInstance, now: i64) -> bool {
        !instance.is_triggered() && self.is_closed(&instance.window(), now)
    }

    /// Whether the window can no longer accept events at `now`. A closed window has fired (or
    /// would have, had it received any event), events for it are late.
    pub fn is_closed(&self, window: &Window, now: i64) -> bool {
        self.deadline(window).is_some_and(|deadline| now >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowKindTag;
    use crate::message::StreamEvent;
    use crate::store::WindowStateStore;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_deadline_includes_allowed_lateness() {
        let config = WindowConfig::tumbling(Duration::from_secs(5))
            .unwrap()
            .with_allowed_lateness(Duration::from_secs(2));
        let policy = TriggerPolicy::from(&config);
        let window = Window::new(0, 5000);

        assert_eq!(policy.deadline(&window), Some(7000));
        assert!(!policy.is_closed(&window, 6999));
        assert!(policy.is_closed(&window, 7000));
    }

    #[test]
    fn test_should_fire_skips_triggered_instances() {
        let config = WindowConfig::tumbling(Duration::from_secs(5))
            .unwrap()
            .with_allowed_lateness(Duration::ZERO);
        let policy = TriggerPolicy::from(&config);

        let mut store = WindowStateStore::new(WindowKindTag::Tumbling);
        let key: Arc<str> = Arc::from("k");
        store
            .get_or_create(&key, 0, 5000)
            .append(StreamEvent::new("1", 10, "x"));

        let instance = store.all_open_for_key("k").next().unwrap();
        assert!(!policy.should_fire(instance, 4999));
        assert!(policy.should_fire(instance, 5000));

        store.mark_triggered("k", 0);
        let removed = store.remove_triggered();
        assert!(!policy.should_fire(removed.first().unwrap(), 10_000));
    }

    #[test]
    fn test_session_policy_never_closes_by_time() {
        let config = WindowConfig::session(Duration::from_secs(2)).unwrap();
        let policy = TriggerPolicy::from(&config);

        let window = Window::new(0, 1000);
        assert_eq!(policy.deadline(&window), None);
        assert!(!policy.is_closed(&window, i64::MAX));
    }

    #[test]
    fn test_gap_exceeded() {
        assert!(!gap_exceeded(1000, 3000, 2000));
        assert!(gap_exceeded(1000, 3001, 2000));
        assert!(!gap_exceeded(1000, 0, 2000));
        assert!(!gap_exceeded(i64::MIN, i64::MIN, 1));
    }
}
