use std::time::Duration;

use crate::config::duration_millis;
use crate::store::WindowStateStore;
use crate::trigger::gap_exceeded;
use crate::windower::{Window, WindowOperation};

/// SessionAssigner groups the events of a key into sessions separated by an inactivity gap larger
/// than the timeout. A session starts at the event time of its first event and its end is the
/// latest event time appended to it.
///
/// The previous session of a key is closed the moment a gap is detected, there is no lateness
/// grace period for sessions, and a closed session is never reopened. An out of order event is
/// only compared against the key's current open session: its gap is negative, so it is appended
/// to that session even if its event time lies inside an already closed one.
#[derive(Debug, Clone)]
pub struct SessionAssigner {
    /// Inactivity gap in milliseconds.
    timeout_millis: i64,
}

impl SessionAssigner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout_millis: duration_millis(timeout),
        }
    }

    pub fn timeout_millis(&self) -> i64 {
        self.timeout_millis
    }

    pub(crate) fn assign(
        &self,
        key: &str,
        event_time: i64,
        store: &WindowStateStore,
    ) -> Vec<WindowOperation> {
        // there is at most one open session per key, pick the most recently active one anyway
        let latest = store
            .all_open_for_key(key)
            .max_by_key(|instance| instance.last_event_time());

        if let Some(instance) = latest
            && !gap_exceeded(instance.last_event_time(), event_time, self.timeout_millis)
        {
            return vec![WindowOperation::Append(instance.window())];
        }

        // gap detected (or first event of the key), close everything open for the key before the
        // new session is opened.
        let mut ops: Vec<WindowOperation> = store
            .all_open_for_key(key)
            .map(|instance| WindowOperation::Close(instance.window()))
            .collect();
        ops.push(WindowOperation::Open(Window::new(event_time, event_time)));
        ops
    }
}
