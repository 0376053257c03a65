use crate::message::StreamEvent;

/// Reduces the buffered events of a fired window into a result payload. It is called exactly once
/// per fired window with the events in the order they were appended, and never with an empty
/// slice.
///
/// Any `Fn(&[StreamEvent]) -> T` closure is an [Aggregator].
pub trait Aggregator: Send + Sync + 'static {
    type Output: Send + 'static;

    fn aggregate(&self, events: &[StreamEvent]) -> Self::Output;
}

impl<F, T> Aggregator for F
where
    F: Fn(&[StreamEvent]) -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn aggregate(&self, events: &[StreamEvent]) -> T {
        self(events)
    }
}

/// Counts the events of the window.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountAggregator;

impl Aggregator for CountAggregator {
    type Output = usize;

    fn aggregate(&self, events: &[StreamEvent]) -> usize {
        events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<A: Aggregator>(aggregator: &A, events: &[StreamEvent]) -> A::Output {
        aggregator.aggregate(events)
    }

    #[test]
    fn test_closure_aggregator() {
        let events = vec![
            StreamEvent::new("1", 1, "a"),
            StreamEvent::new("2", 2, "bb"),
        ];

        let total_len = |events: &[StreamEvent]| -> usize {
            events.iter().map(|event| event.payload().len()).sum()
        };
        assert_eq!(run(&total_len, &events), 3);

        let ids = |events: &[StreamEvent]| -> Vec<String> {
            events.iter().map(|event| event.id().to_string()).collect()
        };
        assert_eq!(run(&ids, &events), vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_count_aggregator() {
        let events = vec![StreamEvent::new("1", 1, "a")];
        assert_eq!(run(&CountAggregator, &events), 1);
    }
}
