//! A sliding window of length `size` starts every `slide`, so a single event belongs to multiple
//! windows. For example, with length 5s and slide 2s, an event with event time 4500 belongs to
//! `[4000, 9000)`, `[2000, 7000)` and `[0, 5000)`. Each of those windows buffers its own copy of
//! the event and fires independently.

use std::time::Duration;

use crate::Result;
use crate::config::duration_millis;
use crate::store::WindowStateStore;
use crate::windower::{
    Window, WindowOperation, open_or_append, truncate_to_duration, unrepresentable,
};

#[derive(Debug, Clone)]
pub struct SlidingAssigner {
    /// Length of each window in milliseconds.
    size_millis: i64,
    /// Slide in milliseconds.
    slide_millis: i64,
}

impl SlidingAssigner {
    pub fn new(size: Duration, slide: Duration) -> Self {
        Self {
            size_millis: duration_millis(size),
            slide_millis: duration_millis(slide),
        }
    }

    /// All the windows `[k * slide, k * slide + size)` containing the event time, latest first.
    /// None if the latest window end overflows.
    pub fn windows_for(&self, event_time: i64) -> Option<Vec<Window>> {
        let mut windows = Vec::new();

        // use the highest multiple of slide which is less than or equal to the event time as the
        // start of the latest window, and walk back one slide at a time while the window still
        // contains the event.
        let mut current_start = truncate_to_duration(event_time, self.slide_millis)?;
        let mut current_end = current_start.checked_add(self.size_millis)?;

        while current_start <= event_time && event_time < current_end {
            windows.push(Window::new(current_start, current_end));

            let Some(previous_start) = current_start.checked_sub(self.slide_millis) else {
                break;
            };
            current_start = previous_start;
            current_end -= self.slide_millis;
        }

        Some(windows)
    }

    pub(crate) fn assign(
        &self,
        key: &str,
        event_time: i64,
        store: &WindowStateStore,
    ) -> Result<Vec<WindowOperation>> {
        let windows = self
            .windows_for(event_time)
            .ok_or_else(|| unrepresentable(event_time))?;
        Ok(open_or_append(key, windows, store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowKindTag;
    use crate::message::StreamEvent;

    #[test]
    fn test_windows_for() {
        let assigner = SlidingAssigner::new(Duration::from_secs(30), Duration::from_secs(10));

        let windows = assigner.windows_for(100_000).unwrap();
        assert_eq!(
            windows,
            vec![
                Window::new(100_000, 130_000),
                Window::new(90_000, 120_000),
                Window::new(80_000, 110_000),
            ]
        );
    }

    #[test]
    fn test_window_count_when_size_is_multiple_of_slide() {
        let assigner = SlidingAssigner::new(Duration::from_millis(6000), Duration::from_millis(2000));

        for t in (0..30_000).step_by(333) {
            let windows = assigner.windows_for(t).unwrap();
            assert_eq!(windows.len(), 3, "event time {t}");
            for window in windows {
                assert_eq!(window.start % 2000, 0);
                assert_eq!(window.end - window.start, 6000);
                assert!(window.contains(t));
            }
        }
    }

    #[test]
    fn test_window_count_when_size_is_not_multiple_of_slide() {
        let assigner = SlidingAssigner::new(Duration::from_millis(5000), Duration::from_millis(2000));

        // [0, 5000), [-2000, 3000), [-4000, 1000)
        assert_eq!(assigner.windows_for(0).unwrap().len(), 3);
        // [0, 5000), [-2000, 3000)
        assert_eq!(assigner.windows_for(1000).unwrap().len(), 2);

        for t in (0..30_000).step_by(250) {
            let count = assigner.windows_for(t).unwrap().len();
            assert!(count == 2 || count == 3, "event time {t} had {count} windows");
        }
    }

    #[test]
    fn test_boundary_belongs_to_next_windows() {
        let assigner = SlidingAssigner::new(Duration::from_millis(4000), Duration::from_millis(2000));

        let windows = assigner.windows_for(4000).unwrap();
        assert_eq!(
            windows,
            vec![Window::new(4000, 8000), Window::new(2000, 6000)]
        );
        assert!(!windows.contains(&Window::new(0, 4000)));
    }

    #[test]
    fn test_assign_mixes_open_and_append() {
        let assigner = SlidingAssigner::new(Duration::from_millis(4000), Duration::from_millis(2000));
        let mut store = WindowStateStore::new(WindowKindTag::Sliding);

        store
            .get_or_create(&"k".into(), 0, 4000)
            .append(StreamEvent::new("1", 1000, "a"));

        let ops = assigner.assign("k", 2500, &store).unwrap();
        assert_eq!(
            ops,
            vec![
                WindowOperation::Open(Window::new(2000, 6000)),
                WindowOperation::Append(Window::new(0, 4000)),
            ]
        );
    }

    #[test]
    fn test_window_end_overflow_is_rejected() {
        let assigner =
            SlidingAssigner::new(Duration::from_millis(5000), Duration::from_millis(2000));
        let store = WindowStateStore::new(WindowKindTag::Sliding);

        assert_eq!(assigner.windows_for(i64::MAX - 10), None);
        assert!(matches!(
            assigner.assign("k", i64::MAX - 10, &store),
            Err(crate::Error::Validation(_))
        ));
    }
}
