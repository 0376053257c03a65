use std::time::Duration;

use crate::Result;
use crate::config::duration_millis;
use crate::store::WindowStateStore;
use crate::windower::{
    Window, WindowOperation, open_or_append, truncate_to_duration, unrepresentable,
};

/// Tumbling windows are fixed size and never overlap, every event belongs to exactly one window.
#[derive(Debug, Clone)]
pub struct TumblingAssigner {
    /// Length of each window in milliseconds
    size_millis: i64,
}

impl TumblingAssigner {
    pub fn new(size: Duration) -> Self {
        Self {
            size_millis: duration_millis(size),
        }
    }

    /// The window `[floor(t / size) * size, start + size)` of the event time. An event time equal
    /// to a window end belongs to the next window. None if the window end overflows.
    pub fn window_for(&self, event_time: i64) -> Option<Window> {
        let start = truncate_to_duration(event_time, self.size_millis)?;
        Some(Window::new(start, start.checked_add(self.size_millis)?))
    }

    pub(crate) fn assign(
        &self,
        key: &str,
        event_time: i64,
        store: &WindowStateStore,
    ) -> Result<Vec<WindowOperation>> {
        let window = self
            .window_for(event_time)
            .ok_or_else(|| unrepresentable(event_time))?;
        Ok(open_or_append(key, vec![window], store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowKindTag;
    use crate::message::StreamEvent;

    #[test]
    fn test_window_for() {
        let assigner = TumblingAssigner::new(Duration::from_secs(60));

        assert_eq!(assigner.window_for(60000), Some(Window::new(60000, 120000)));
        assert_eq!(assigner.window_for(61000), Some(Window::new(60000, 120000)));
        assert_eq!(assigner.window_for(119999), Some(Window::new(60000, 120000)));
    }

    #[test]
    fn test_boundary_belongs_to_next_window() {
        let assigner = TumblingAssigner::new(Duration::from_millis(5000));

        let window = assigner.window_for(4999).unwrap();
        assert_eq!(window, Window::new(0, 5000));
        assert!(!window.contains(5000));

        assert_eq!(assigner.window_for(5000), Some(Window::new(5000, 10000)));
        assert_eq!(assigner.window_for(10000), Some(Window::new(10000, 15000)));
    }

    #[test]
    fn test_membership_property() {
        let assigner = TumblingAssigner::new(Duration::from_millis(700));
        for t in (0..20_000).step_by(37) {
            let window = assigner.window_for(t).unwrap();
            assert_eq!(window.start, (t / 700) * 700);
            assert_eq!(window.end - window.start, 700);
            assert!(window.contains(t));
        }
    }

    #[test]
    fn test_assign_open_then_append() {
        let assigner = TumblingAssigner::new(Duration::from_secs(60));
        let mut store = WindowStateStore::new(WindowKindTag::Tumbling);

        let ops = assigner.assign("k", 60000, &store).unwrap();
        assert_eq!(ops, vec![WindowOperation::Open(Window::new(60000, 120000))]);

        store
            .get_or_create(&"k".into(), 60000, 120000)
            .append(StreamEvent::new("1", 60000, "a"));

        let ops = assigner.assign("k", 61000, &store).unwrap();
        assert_eq!(ops, vec![WindowOperation::Append(Window::new(60000, 120000))]);

        // other keys do not see the window
        let ops = assigner.assign("other", 61000, &store).unwrap();
        assert_eq!(ops, vec![WindowOperation::Open(Window::new(60000, 120000))]);
    }

    #[test]
    fn test_window_end_overflow_is_rejected() {
        let assigner = TumblingAssigner::new(Duration::from_millis(5000));
        let store = WindowStateStore::new(WindowKindTag::Tumbling);

        assert_eq!(assigner.window_for(i64::MAX - 10), None);
        assert!(matches!(
            assigner.assign("k", i64::MAX - 10, &store),
            Err(crate::Error::Validation(_))
        ));

        // the last window which still fits
        let start = (i64::MAX / 5000) * 5000 - 5000;
        assert_eq!(
            assigner.window_for(start),
            Some(Window::new(start, start + 5000))
        );
    }
}
